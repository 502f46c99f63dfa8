//! Application state shared across handlers.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::history::MessageRepository;
use crate::tasks::TaskManager;
use crate::ws::Hub;

/// State shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Single-agent WebSocket hub.
    pub hub: Arc<Hub>,
    /// Reply correlation layer.
    pub tasks: Arc<TaskManager>,
    /// Message audit trail.
    pub history: MessageRepository,
    /// Shared secret; empty disables auth.
    pub api_key: String,
    /// Admission gate: at most one in-flight chat request.
    pub gate: Arc<Semaphore>,
}

impl AppState {
    pub fn new(
        hub: Arc<Hub>,
        tasks: Arc<TaskManager>,
        history: MessageRepository,
        api_key: String,
    ) -> Self {
        Self {
            hub,
            tasks,
            history,
            api_key,
            gate: Arc::new(Semaphore::new(1)),
        }
    }
}
