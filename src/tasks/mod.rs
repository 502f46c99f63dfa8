//! Correlation layer between chat requests and extension replies.
//!
//! Each in-flight request registers a task keyed by its `chatcmpl-` id.
//! The dispatcher consumes the hub's inbound stream and routes reply
//! frames to the matching inbox. The request side is the only party that
//! closes an inbox (by deregistering); the dispatcher treats a closed
//! inbox as a logged drop, which keeps send-and-close race-free.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

use crate::ws::{Frame, FrameType, ReplyPayload, ReplyStatus};

/// Per-task inbox capacity, sized for PROCESSING bursts.
const INBOX_BUFFER: usize = 10;

#[derive(Debug, Error)]
pub enum TaskError {
    /// The agent reported a failure for this task.
    #[error("{0}")]
    Agent(String),
    #[error("task timeout")]
    Timeout,
    #[error("task channel closed unexpectedly")]
    ChannelClosed,
}

/// Registry of in-flight tasks and the dispatcher that feeds them.
#[derive(Default)]
pub struct TaskManager {
    tasks: DashMap<String, mpsc::Sender<ReplyPayload>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and hand back its inbox.
    pub fn create(&self, task_id: &str) -> mpsc::Receiver<ReplyPayload> {
        let (tx, rx) = mpsc::channel(INBOX_BUFFER);
        self.tasks.insert(task_id.to_string(), tx);
        rx
    }

    /// Deregister a task. Dropping the sender is what closes the inbox;
    /// a second call is a no-op.
    pub fn remove(&self, task_id: &str) {
        self.tasks.remove(task_id);
    }

    /// Route one inbound frame to its task, if any.
    ///
    /// `EVENT_ERROR` payloads are coerced into an `ERROR` reply even when
    /// malformed; any frame without a known correlation id is dropped.
    pub fn dispatch(&self, frame: Frame) {
        let Some(reply_to) = frame.reply_to.filter(|id| !id.is_empty()) else {
            return;
        };

        let payload = match frame.frame_type {
            FrameType::EventError => {
                let mut payload = frame
                    .payload
                    .and_then(|raw| serde_json::from_value::<ReplyPayload>(raw).ok())
                    .unwrap_or_default();
                if payload.error.as_deref().is_none_or(str::is_empty) {
                    payload.error = Some("unknown error from extension".to_string());
                }
                payload.status = ReplyStatus::Error;
                payload
            }
            FrameType::EventReply => match frame.payload {
                None => ReplyPayload::default(),
                Some(raw) => match serde_json::from_value(raw) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!("[task] invalid reply payload: {err}");
                        return;
                    }
                },
            },
            _ => return,
        };

        let Some(tx) = self.tasks.get(&reply_to) else {
            warn!("[task] no task found for reply_to={reply_to}");
            return;
        };
        match tx.try_send(payload) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Safe to drop: PROCESSING text is cumulative, so the next
                // frame subsumes this one.
                warn!("[task] inbox full for {reply_to}, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("[task] inbox already closed for {reply_to}");
            }
        }
    }

    /// Consume the hub's inbound stream forever, routing each frame.
    pub fn start_dispatcher(self: &Arc<Self>, mut inbound: mpsc::Receiver<Frame>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                debug!(
                    "[task] received: type={:?} reply_to={:?}",
                    frame.frame_type, frame.reply_to
                );
                manager.dispatch(frame);
            }
        })
    }

    /// Wait until the task reaches DONE or ERROR.
    ///
    /// PROCESSING payloads are retained as a fallback: if the inbox closes
    /// before a terminal frame, the last one seen is returned rather than
    /// an error.
    pub async fn wait_for_done(
        &self,
        inbox: &mut mpsc::Receiver<ReplyPayload>,
        wait: Duration,
    ) -> Result<ReplyPayload, TaskError> {
        let deadline = Instant::now() + wait;
        let mut last_seen: Option<ReplyPayload> = None;

        loop {
            let payload = match timeout_at(deadline, inbox.recv()).await {
                Err(_) => return Err(TaskError::Timeout),
                Ok(None) => return last_seen.ok_or(TaskError::ChannelClosed),
                Ok(Some(payload)) => payload,
            };

            match payload.status {
                ReplyStatus::Error => {
                    let message = payload
                        .error
                        .unwrap_or_else(|| "unknown error from extension".to_string());
                    return Err(TaskError::Agent(message));
                }
                ReplyStatus::Done => return Ok(payload),
                ReplyStatus::Processing => last_seen = Some(payload),
            }
        }
    }
}
