use std::sync::Arc;
use std::time::Duration;

use murmur_db::Database;
use murmur_gateway::dispatcher::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    /// Interval between SSE keep-alive comments. Each one is a write to the
    /// client, so a dead connection is noticed within one interval.
    pub keep_alive: Duration,
}
