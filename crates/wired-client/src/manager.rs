//! Registry of open tabs.
//!
//! Tabs live in a `HashMap` keyed by [`TabId`] with a separate `Vec` holding
//! the on-screen order. Every operation takes an id; ids of tabs that no
//! longer exist are ignored. Structural changes are persisted immediately.

use std::collections::HashMap;

use tokio::sync::mpsc;
use wired_proto::ServerMessage;

use crate::config::ClientConfig;
use crate::event::{ClientEvent, ClientEventKind};
use crate::layout::{self, ContainerSize};
use crate::session::{now_millis, Latency, TabId, TabSession};
use crate::snapshot::Snapshot;
use crate::store::KeyValueStore;
use crate::transport::{ConnectionState, TransportFactory, WsTransportFactory};

/// What the status bar shows: the active tab's connection and latency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusIndicator {
    pub connection: ConnectionState,
    pub latency: Option<Latency>,
}

impl Default for StatusIndicator {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Connecting,
            latency: None,
        }
    }
}

/// Status bar text, e.g. `Connected 42ms (fast)`. Latency is only shown
/// while the channel is open.
impl std::fmt::Display for StatusIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.connection.label())?;
        match self.latency {
            Some(latency) if self.connection.is_open() => {
                write!(f, " {}ms ({})", latency.millis, latency.level.label())
            }
            _ => Ok(()),
        }
    }
}

pub struct TabManager {
    config: ClientConfig,
    factory: Box<dyn TransportFactory>,
    store: Box<dyn KeyValueStore>,
    events: mpsc::UnboundedSender<ClientEvent>,
    tabs: HashMap<TabId, TabSession>,
    order: Vec<TabId>,
    active: Option<TabId>,
    next_id: TabId,
    grid_mode: bool,
    container: Option<ContainerSize>,
    status: StatusIndicator,
}

impl TabManager {
    /// Create an empty manager. The returned receiver yields every tab's
    /// channel and timer events; feed them back through [`handle_event`].
    ///
    /// [`handle_event`]: TabManager::handle_event
    pub fn new(
        config: ClientConfig,
        factory: impl TransportFactory + 'static,
        store: impl KeyValueStore + 'static,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Self {
            config,
            factory: Box::new(factory),
            store: Box::new(store),
            events,
            tabs: HashMap::new(),
            order: Vec::new(),
            active: None,
            next_id: 1,
            grid_mode: false,
            container: None,
            status: StatusIndicator::default(),
        };
        (manager, rx)
    }

    /// Manager whose tabs each open a WebSocket to `config.server_url`.
    pub fn for_server(
        config: ClientConfig,
        store: impl KeyValueStore + 'static,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let factory = WsTransportFactory::from_config(&config);
        Self::new(config, factory, store)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Tab ids in on-screen order.
    pub fn tab_ids(&self) -> &[TabId] {
        &self.order
    }

    pub fn tab(&self, id: TabId) -> Option<&TabSession> {
        self.tabs.get(&id)
    }

    pub fn active_id(&self) -> Option<TabId> {
        self.active
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_grid_mode(&self) -> bool {
        self.grid_mode
    }

    pub fn status(&self) -> StatusIndicator {
        self.status
    }

    /// Rebuild tabs from the stored snapshot.
    ///
    /// Ids, names, order and screen content come back as saved. A missing,
    /// empty or unreadable snapshot yields a single fresh tab. Any tabs
    /// already open are destroyed first.
    pub fn restore_state(&mut self) {
        for id in std::mem::take(&mut self.order) {
            if let Some(session) = self.tabs.remove(&id) {
                session.destroy();
            }
        }
        self.active = None;

        let snapshot = match Snapshot::load(self.store.as_ref()) {
            Ok(Some(snapshot)) if !snapshot.tabs.is_empty() => snapshot,
            Ok(_) => {
                log::info!("no saved tabs, starting fresh");
                self.create_tab(None);
                return;
            }
            Err(e) => {
                log::warn!("discarding unreadable tab snapshot: {e}");
                self.create_tab(None);
                return;
            }
        };

        self.grid_mode = snapshot.is_grid_mode;
        for tab in &snapshot.tabs {
            if self.tabs.contains_key(&tab.id) {
                log::warn!("snapshot lists tab {} twice, keeping the first", tab.id);
                continue;
            }
            let name = if tab.name.trim().is_empty() {
                default_name(tab.id)
            } else {
                tab.name.clone()
            };
            self.open_tab(tab.id, name, Some(&tab.content));
        }

        let max_id = self.order.iter().copied().max().unwrap_or(0);
        self.next_id = snapshot.next_id.max(max_id + 1);

        let active = snapshot
            .active_id
            .filter(|id| self.tabs.contains_key(id))
            .or_else(|| self.order.first().copied());
        if let Some(id) = active {
            self.set_active_tab(id);
        }
        log::info!("restored {} tab(s)", self.order.len());
    }

    /// Open a new tab at the end of the strip and make it active.
    pub fn create_tab(&mut self, name: Option<String>) -> TabId {
        let id = self.next_id;
        self.next_id += 1;
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_name(id));
        self.open_tab(id, name, None);
        self.set_active_tab(id);
        id
    }

    /// Make `id` the active tab. Returns `false` for unknown ids.
    pub fn set_active_tab(&mut self, id: TabId) -> bool {
        if !self.tabs.contains_key(&id) {
            return false;
        }
        if let Some(previous) = self.active.filter(|prev| *prev != id) {
            if let Some(session) = self.tabs.get_mut(&previous) {
                session.deactivate();
            }
        }
        self.active = Some(id);
        if let Some(session) = self.tabs.get_mut(&id) {
            session.activate();
            self.status = StatusIndicator {
                connection: session.connection(),
                latency: session.latency(),
            };
        }
        self.refit();
        self.save_state();
        true
    }

    /// Destroy a tab. If it was active, the last remaining tab takes over;
    /// closing the last tab opens a fresh one so the strip is never empty.
    pub fn close_tab(&mut self, id: TabId) -> bool {
        let Some(session) = self.tabs.remove(&id) else {
            return false;
        };
        self.order.retain(|t| *t != id);
        session.destroy();

        if self.active == Some(id) {
            self.active = None;
            match self.order.last().copied() {
                Some(next) => {
                    self.set_active_tab(next);
                }
                None => {
                    self.create_tab(None);
                }
            }
        } else {
            self.refit();
            self.save_state();
        }
        true
    }

    /// Move a tab to `index` in the strip, clamped to the valid range.
    pub fn move_tab(&mut self, id: TabId, index: usize) -> bool {
        let Some(from) = self.order.iter().position(|t| *t == id) else {
            return false;
        };
        self.order.remove(from);
        let to = index.min(self.order.len());
        self.order.insert(to, id);
        self.save_state();
        true
    }

    /// Rename a tab. Blank names are rejected.
    pub fn rename_tab(&mut self, id: TabId, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let Some(session) = self.tabs.get_mut(&id) else {
            return false;
        };
        session.rename(name.to_string());
        self.save_state();
        true
    }

    pub fn set_grid_mode(&mut self, grid: bool) {
        if self.grid_mode == grid {
            return;
        }
        self.grid_mode = grid;
        self.refit();
        self.save_state();
    }

    pub fn toggle_layout(&mut self) {
        self.set_grid_mode(!self.grid_mode);
    }

    /// The terminal area changed size; refit every tab.
    pub fn resize(&mut self, container: ContainerSize) {
        self.container = Some(container);
        self.refit();
    }

    /// Keystrokes for the active tab.
    pub fn send_input(&self, data: &str) {
        if let Some(session) = self.active.and_then(|id| self.tabs.get(&id)) {
            session.send_input(data);
        }
    }

    /// Print a line into the active tab, e.g. an upload result.
    pub fn write_notice(&mut self, text: &str) {
        if let Some(session) = self.active.and_then(|id| self.tabs.get_mut(&id)) {
            session.render(&format!("\r\n{text}\r\n"));
        }
    }

    pub fn handle_event(&mut self, event: ClientEvent) {
        self.handle_event_at(event, now_millis());
    }

    /// Dispatch one tab event, with `now_ms` as the heartbeat clock.
    pub fn handle_event_at(&mut self, event: ClientEvent, now_ms: i64) {
        let is_active = self.active == Some(event.tab);
        let Some(session) = self.tabs.get_mut(&event.tab) else {
            log::trace!("dropping event for closed tab {}", event.tab);
            return;
        };

        match event.kind {
            ClientEventKind::Connection(state) => {
                session.on_connection(state);
                if is_active {
                    self.status.connection = state;
                }
            }
            ClientEventKind::Message(ServerMessage::Output { data }) => session.render(&data),
            ClientEventKind::Message(ServerMessage::Heartbeat { timestamp }) => {
                if let Some(latency) = session.on_heartbeat_echo(timestamp, now_ms) {
                    if is_active {
                        self.status.latency = Some(latency);
                    }
                }
            }
            ClientEventKind::HeartbeatDue => {
                session.send_heartbeat(now_ms);
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            active_id: self.active,
            next_id: self.next_id,
            is_grid_mode: self.grid_mode,
            tabs: self
                .order
                .iter()
                .filter_map(|id| self.tabs.get(id))
                .map(TabSession::snapshot)
                .collect(),
        }
    }

    /// Persist the current layout. Failures are logged, never raised.
    pub fn save_state(&mut self) {
        let snapshot = self.snapshot();
        if let Err(e) = snapshot.save(self.store.as_mut()) {
            log::warn!("failed to save tab snapshot: {e}");
        }
    }

    /// Save once more and tear every tab down.
    pub fn shutdown(&mut self) {
        self.save_state();
        for id in std::mem::take(&mut self.order) {
            if let Some(session) = self.tabs.remove(&id) {
                session.destroy();
            }
        }
        self.active = None;
    }

    fn open_tab(&mut self, id: TabId, name: String, restored: Option<&str>) {
        let size = match self.container {
            Some(container) => {
                let tile = self.tile(container, self.order.len() + 1);
                layout::fit(tile, self.config.cell)
            }
            None => self.config.default_size,
        };
        let session = TabSession::open(
            id,
            name,
            restored,
            size,
            &self.config,
            self.factory.as_ref(),
            self.events.clone(),
        );
        self.tabs.insert(id, session);
        self.order.push(id);
    }

    fn tile(&self, container: ContainerSize, count: usize) -> ContainerSize {
        if self.grid_mode {
            layout::grid_tile(container, count)
        } else {
            container
        }
    }

    fn refit(&mut self) {
        let Some(container) = self.container else {
            return;
        };
        let size = layout::fit(self.tile(container, self.order.len()), self.config.cell);
        for id in &self.order {
            if let Some(session) = self.tabs.get_mut(id) {
                session.resize(size);
            }
        }
    }
}

fn default_name(id: TabId) -> String {
    format!("Terminal {id}")
}
