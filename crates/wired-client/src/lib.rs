//! wired-client: the tab side of the web terminal.
//!
//! Each tab pairs a terminal emulator with its own reconnecting channel to
//! the server. The [`TabManager`] keeps every tab in an explicit registry
//! keyed by [`TabId`], tracks which one is active, and persists a snapshot
//! of names, order and rendered screens so a reload can redraw them.
//!
//! # Architecture
//!
//! - [`transport`]: per-tab WebSocket channel with bounded reconnection.
//! - [`session`]: a single tab, pairing emulator + channel + heartbeat timer.
//! - [`manager`]: the registry, active selection, snapshot save/restore.
//! - [`driver`]: the event loop that owns the manager and dispatches UI
//!   commands, channel events and timers.

pub mod config;
pub mod driver;
pub mod event;
pub mod layout;
pub mod manager;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod timer;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ClientConfig, ReconnectPolicy};
pub use driver::Command;
pub use event::{ClientEvent, ClientEventKind};
pub use layout::{CellMetrics, ContainerSize};
pub use manager::{StatusIndicator, TabManager};
pub use session::{Latency, Lifecycle, SignalLevel, TabId, TabSession};
pub use snapshot::{Snapshot, TabSnapshot};
pub use store::{KeyValueStore, MemoryStore, SqliteStore, StoreError};
pub use transport::{ConnectionState, Transport, TransportError, TransportFactory, WsTransportFactory};
