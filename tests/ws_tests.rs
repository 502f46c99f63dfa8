//! Hub behavior over a live WebSocket: registration, delivery both ways,
//! heartbeat, half-open detection, and hot replacement.

mod common;

use std::time::Duration;

use common::{connect_ws, spawn_server, spawn_server_with_ws, wait_for_session, WsClient};
use futures::{SinkExt, StreamExt};
use gemini_relay::config::WebSocketConfig;
use gemini_relay::ws::{Frame, FrameType, HubError, ReplyStatus};
use tokio_tungstenite::tungstenite::Message;

/// Read text frames until one parses as `Frame`, skipping transport noise.
async fn next_frame(socket: &mut WsClient, wait: Duration) -> Frame {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let message = tokio::time::timeout_at(deadline, socket.next())
            .await
            .expect("frame within deadline")
            .expect("socket open")
            .expect("read ok");
        if let Message::Text(text) = message {
            if let Ok(frame) = serde_json::from_str::<Frame>(&text) {
                return frame;
            }
        }
    }
}

fn command_frame(id: &str) -> Frame {
    Frame {
        id: Some(id.to_string()),
        reply_to: None,
        frame_type: FrameType::CmdSendMessage,
        payload: None,
    }
}

#[tokio::test]
async fn connection_registers_a_session() {
    let server = spawn_server("").await;
    let _socket = connect_ws(&server).await;
    wait_for_session(&server).await;

    assert!(server.hub.current().is_some());
    assert!(server.hub.is_ready());
}

#[tokio::test]
async fn send_delivers_to_the_extension() {
    let server = spawn_server("").await;
    let mut socket = connect_ws(&server).await;
    wait_for_session(&server).await;

    server
        .hub
        .send(&command_frame("test-123"))
        .expect("send to extension");

    let received = next_frame(&mut socket, Duration::from_secs(2)).await;
    assert_eq!(received.frame_type, FrameType::CmdSendMessage);
    assert_eq!(received.id.as_deref(), Some("test-123"));
}

#[tokio::test]
async fn send_without_client_is_no_peer() {
    let server = spawn_server("").await;

    let err = server
        .hub
        .send(&command_frame("test-123"))
        .expect_err("no peer");
    assert!(matches!(err, HubError::NoPeer));
}

#[tokio::test]
async fn inbound_replies_route_to_their_task() {
    let server = spawn_server("").await;
    let mut inbox = server.tasks.create("task-456");

    let mut socket = connect_ws(&server).await;
    wait_for_session(&server).await;

    let reply = Frame {
        id: None,
        reply_to: Some("task-456".to_string()),
        frame_type: FrameType::EventReply,
        payload: Some(serde_json::json!({"text": "hello", "status": "DONE"})),
    };
    socket
        .send(Message::Text(serde_json::to_string(&reply).unwrap()))
        .await
        .expect("send reply");

    let payload = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
        .await
        .expect("routed within deadline")
        .expect("payload delivered");
    assert_eq!(payload.text, "hello");
    assert_eq!(payload.status, ReplyStatus::Done);
}

#[tokio::test]
async fn heartbeat_sends_application_pings() {
    let server = spawn_server_with_ws(
        "",
        WebSocketConfig {
            ping_interval: 1,
            pong_timeout: 5,
        },
    )
    .await;
    let mut socket = connect_ws(&server).await;
    wait_for_session(&server).await;

    let frame = next_frame(&mut socket, Duration::from_secs(5)).await;
    assert_eq!(frame.frame_type, FrameType::Ping);

    // Answering keeps the session alive.
    let pong = Frame {
        id: None,
        reply_to: None,
        frame_type: FrameType::Pong,
        payload: None,
    };
    socket
        .send(Message::Text(serde_json::to_string(&pong).unwrap()))
        .await
        .expect("send pong");
    assert!(server.hub.is_ready());
}

#[tokio::test]
async fn silent_peer_is_dropped_after_the_read_deadline() {
    let server = spawn_server_with_ws(
        "",
        WebSocketConfig {
            ping_interval: 1,
            pong_timeout: 1,
        },
    )
    .await;
    let _socket = connect_ws(&server).await;
    wait_for_session(&server).await;

    // Never answer the pings; the session must detach within the window
    // (ping_interval + pong_timeout) plus slack.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(6);
    loop {
        if server.hub.current().is_none() {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("half-open session never detached");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!server.hub.is_ready());
}

#[tokio::test]
async fn a_new_connection_replaces_the_old_one() {
    let server = spawn_server("").await;

    let mut first = connect_ws(&server).await;
    wait_for_session(&server).await;

    let mut second = connect_ws(&server).await;

    // The first connection is closed by the hub.
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match first.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "old connection was not closed");

    // The hub now routes to the second connection.
    server
        .hub
        .send(&command_frame("after-replace"))
        .expect("send to replacement");
    let received = next_frame(&mut second, Duration::from_secs(2)).await;
    assert_eq!(received.id.as_deref(), Some("after-replace"));
}
