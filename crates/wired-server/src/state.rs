//! State shared by every HTTP and WebSocket handler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use wired_pty::SpawnOptions;

use crate::config::ServerConfig;

pub type ConnectionId = u64;

/// Notices queued per bridge before a slow one starts missing them.
const NOTICE_CAPACITY: usize = 64;

pub struct AppState {
    pub config: ServerConfig,
    /// Server-wide lines pushed into every open terminal.
    notices: broadcast::Sender<String>,
    next_id: AtomicU64,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            config,
            notices,
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next connection id, used to tag logs.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<String> {
        self.notices.subscribe()
    }

    /// Broadcast a line to every open terminal. Returns how many received it.
    pub fn notify(&self, line: impl Into<String>) -> usize {
        self.notices.send(line.into()).unwrap_or(0)
    }

    /// How shells are launched for new connections.
    pub fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions::new(self.config.shell.clone()).with_cwd(self.config.workdir.clone())
    }
}
