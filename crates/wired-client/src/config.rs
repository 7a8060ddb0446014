use std::time::Duration;

use wired_proto::TermSize;

use crate::layout::CellMetrics;

/// How a channel retries after losing its connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before the channel gives up for good.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
    /// Limit on a single connection attempt, handshake included.
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Client-side tunables.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:3939/ws`.
    pub server_url: String,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
    pub autosave_interval: Duration,
    pub cell: CellMetrics,
    /// Grid size used until the first container measurement.
    pub default_size: TermSize,
    pub scrollback: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3939/ws".to_string(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_secs(2),
            autosave_interval: Duration::from_secs(5),
            cell: CellMetrics::default(),
            default_size: TermSize::default(),
            scrollback: wired_vt::terminal::DEFAULT_SCROLLBACK,
        }
    }
}
