//! Shared test harness: boots a relay on an ephemeral port with an
//! in-memory database and simulates the browser extension over a live
//! WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use gemini_relay::api::{create_router, AppState};
use gemini_relay::config::WebSocketConfig;
use gemini_relay::db::Database;
use gemini_relay::history::MessageRepository;
use gemini_relay::tasks::TaskManager;
use gemini_relay::ws::{Frame, FrameType, Hub};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<Hub>,
    pub tasks: Arc<TaskManager>,
    pub history: MessageRepository,
}

impl TestServer {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Boot a relay with heartbeat timing slow enough to stay out of the way.
pub async fn spawn_server(api_key: &str) -> TestServer {
    spawn_server_with_ws(
        api_key,
        WebSocketConfig {
            ping_interval: 60,
            pong_timeout: 10,
        },
    )
    .await
}

pub async fn spawn_server_with_ws(api_key: &str, ws: WebSocketConfig) -> TestServer {
    let db = Database::in_memory().await.expect("in-memory database");
    let history = MessageRepository::new(db.pool().clone());

    let (hub, inbound) = Hub::new(&ws);
    let tasks = Arc::new(TaskManager::new());
    tasks.start_dispatcher(inbound);

    let state = AppState::new(hub.clone(), tasks.clone(), history.clone(), api_key.to_string());
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    TestServer {
        addr,
        hub,
        tasks,
        history,
    }
}

pub async fn connect_ws(server: &TestServer) -> WsClient {
    let (socket, _) = connect_async(server.ws_url()).await.expect("dial ws");
    socket
}

/// Poll until the hub has registered a session.
pub async fn wait_for_session(server: &TestServer) {
    for _ in 0..200 {
        if server.hub.current().is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("extension session never registered");
}

/// Connect as the extension and answer every `CMD_SEND_MESSAGE` with the
/// scripted replies, stamping each with the command's task id.
pub async fn simulate_extension(server: &TestServer, replies: Vec<Frame>) {
    let mut socket = connect_ws(server).await;
    tokio::spawn(async move {
        while let Some(Ok(message)) = socket.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let Ok(frame) = serde_json::from_str::<Frame>(&text) else {
                continue;
            };
            if frame.frame_type != FrameType::CmdSendMessage {
                continue;
            }
            for reply in &replies {
                let mut reply = reply.clone();
                reply.reply_to = frame.id.clone();
                let data = serde_json::to_string(&reply).expect("serialize reply");
                if socket.send(Message::Text(data)).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    });
    wait_for_session(server).await;
}

pub fn reply_frame(text: &str, status: &str, conversation_id: &str) -> Frame {
    Frame {
        id: None,
        reply_to: None,
        frame_type: FrameType::EventReply,
        payload: Some(serde_json::json!({
            "text": text,
            "status": status,
            "conversation_id": conversation_id,
        })),
    }
}
