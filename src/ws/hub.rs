//! Single-agent hub: owns at most one extension session and pumps frames
//! both ways.
//!
//! Each session runs three workers: a reader (with a rolling read deadline
//! for half-open detection), a writer draining the bounded outbound queue,
//! and a heartbeat sending application-level PING frames. Writer and
//! heartbeat serialize their socket writes through a shared mutex. A new
//! connection always wins: attaching closes whatever session came before.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval_at, timeout, Instant};

use crate::config::WebSocketConfig;

use super::types::{Frame, FrameType};

/// Inbound frame buffer shared across session generations.
const INBOUND_BUFFER: usize = 100;
/// Per-session outbound queue.
const OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("no extension client connected")]
    NoPeer,
    #[error("send buffer full")]
    SendBufferFull,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One live extension connection.
///
/// The closed flag is monotonic: it flips to true exactly once, on read
/// error, write error, read-deadline expiry, or hot replacement.
pub struct Session {
    outbound: mpsc::Sender<String>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl Session {
    fn new(outbound: mpsc::Sender<String>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            outbound,
            closed: AtomicBool::new(false),
            closed_tx,
        }
    }

    /// Mark the session closed and wake its workers. Idempotent.
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.closed_tx.send(true);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }
}

/// Manages the solitary agent connection.
pub struct Hub {
    session: RwLock<Option<Arc<Session>>>,
    inbound_tx: mpsc::Sender<Frame>,
    ping_interval: Duration,
    pong_timeout: Duration,
}

impl Hub {
    /// Build a hub together with the receiving end of its inbound frame
    /// stream. The receiver is handed to the task dispatcher; the hub never
    /// closes it.
    pub fn new(cfg: &WebSocketConfig) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let hub = Arc::new(Self {
            session: RwLock::new(None),
            inbound_tx,
            ping_interval: Duration::from_secs(cfg.ping_interval),
            pong_timeout: Duration::from_secs(cfg.pong_timeout),
        });
        (hub, inbound_rx)
    }

    /// The current session, if an agent is attached.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.slot().clone()
    }

    /// Whether an agent is attached and able to take a command.
    pub fn is_ready(&self) -> bool {
        self.current().is_some_and(|session| !session.is_closed())
    }

    /// Serialize a frame onto the current session's outbound queue.
    ///
    /// Non-blocking: a saturated queue is reported rather than waited on.
    pub fn send(&self, frame: &Frame) -> Result<(), HubError> {
        let session = self.current().ok_or(HubError::NoPeer)?;
        if session.is_closed() {
            return Err(HubError::NoPeer);
        }
        let data = serde_json::to_string(frame)?;
        match session.outbound.try_send(data) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(HubError::SendBufferFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(HubError::NoPeer),
        }
    }

    /// Run an upgraded socket as the hub's session until it dies.
    ///
    /// Replacing a prior session gives in-flight requests bound to it no
    /// out-of-band signal; they surface their 120 s timeout instead.
    pub async fn run_session(self: Arc<Self>, socket: WebSocket) {
        let (sink, mut stream) = socket.split();
        let sink = Arc::new(Mutex::new(sink));

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let session = Arc::new(Session::new(outbound_tx));

        // Workers subscribe to the close signal before the session becomes
        // visible, so a replacement arriving immediately after attach
        // cannot slip past them.
        let writer_closed = session.closed_signal();
        let ping_closed = session.closed_signal();
        let reader_closed = session.closed_signal();

        {
            let mut slot = self.slot_mut();
            if let Some(old) = slot.replace(session.clone()) {
                info!("[ws] replacing old extension connection");
                old.close();
            }
        }
        info!("[ws] extension connected");

        tokio::spawn(write_pump(
            sink.clone(),
            outbound_rx,
            session.clone(),
            writer_closed,
        ));
        tokio::spawn(ping_pump(
            sink,
            session.clone(),
            self.ping_interval,
            ping_closed,
        ));

        self.read_pump(&session, &mut stream, reader_closed).await;

        {
            let mut slot = self.slot_mut();
            if slot
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &session))
            {
                *slot = None;
            }
        }
        session.close();
        info!("[ws] extension disconnected");
    }

    /// Receive loop. Every socket receive is bounded by the read deadline
    /// (`ping_interval + pong_timeout`), refreshed by any inbound frame.
    async fn read_pump(
        &self,
        session: &Arc<Session>,
        stream: &mut SplitStream<WebSocket>,
        mut closed: watch::Receiver<bool>,
    ) {
        let window = self.ping_interval + self.pong_timeout;

        loop {
            if session.is_closed() {
                break;
            }
            let received = tokio::select! {
                _ = closed.changed() => break,
                received = timeout(window, stream.next()) => received,
            };

            let message = match received {
                Err(_) => {
                    warn!("[ws] read deadline exceeded, dropping connection");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    warn!("[ws] read error: {err}");
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => {
                    debug!("[ws] extension closed connection");
                    break;
                }
                // Transport-level ping/pong and binary frames carry no
                // protocol data but still count as liveness.
                _ => continue,
            };

            let frame: Frame = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("[ws] invalid frame: {err}");
                    continue;
                }
            };

            // Heartbeat replies only refresh the read deadline.
            if matches!(frame.frame_type, FrameType::Pong | FrameType::EventPong) {
                continue;
            }

            if let Err(mpsc::error::TrySendError::Full(_)) = self.inbound_tx.try_send(frame) {
                warn!("[ws] inbound buffer full, dropping frame");
            }
        }
    }

    fn slot(&self) -> RwLockReadGuard<'_, Option<Arc<Session>>> {
        self.session.read().unwrap_or_else(|e| e.into_inner())
    }

    fn slot_mut(&self) -> RwLockWriteGuard<'_, Option<Arc<Session>>> {
        self.session.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drain the outbound queue into the socket, one serialized write per
/// frame under the sink mutex shared with the heartbeat.
async fn write_pump(
    sink: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    mut outbound: mpsc::Receiver<String>,
    session: Arc<Session>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        if session.is_closed() {
            return;
        }
        let data = tokio::select! {
            _ = closed.changed() => return,
            data = outbound.recv() => match data {
                Some(data) => data,
                None => return,
            },
        };

        let mut guard = sink.lock().await;
        if session.is_closed() {
            return;
        }
        if let Err(err) = guard.send(Message::Text(data.into())).await {
            warn!("[ws] write error: {err}");
            session.close();
            return;
        }
    }
}

/// Send an application-level PING every `ping_interval`. The agent's PONG
/// (or any other inbound frame) refreshes the reader's deadline.
async fn ping_pump(
    sink: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    session: Arc<Session>,
    ping_interval: Duration,
    mut closed: watch::Receiver<bool>,
) {
    let Ok(ping) = serde_json::to_string(&Frame::ping()) else {
        return;
    };

    let mut ticker = interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        if session.is_closed() {
            return;
        }
        tokio::select! {
            _ = closed.changed() => return,
            _ = ticker.tick() => {}
        }

        let mut guard = sink.lock().await;
        if session.is_closed() {
            return;
        }
        if let Err(err) = guard.send(Message::Text(ping.clone().into())).await {
            warn!("[ws] ping error: {err}");
            session.close();
            return;
        }
    }
}
