use std::sync::Arc;

use command_core::CommandStore;

/// Shared state handed to every handler via `axum::extract::State`. The
/// only mutable thing a handler ever touches is the store; the store is
/// responsible for its own internal synchronization.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CommandStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn CommandStore>) -> Self {
        Self { store }
    }
}

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}
