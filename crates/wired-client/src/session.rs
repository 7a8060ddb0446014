//! One terminal tab: an emulator, its own channel, and a heartbeat timer.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use wired_proto::{ClientMessage, TermSize};
use wired_vt::VtTerminal;

use crate::config::ClientConfig;
use crate::event::{ClientEvent, ClientEventKind};
use crate::snapshot::TabSnapshot;
use crate::timer::RepeatingTimer;
use crate::transport::{ConnectionState, Transport, TransportError, TransportFactory};

pub type TabId = u64;

/// Drawn after restored content so it is obvious the screen is a replay.
pub const RESTORED_MARKER: &str = "\r\n\x1b[2m--- session restored ---\x1b[0m\r\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Initializing,
    Active,
    Background,
    Destroyed,
}

/// Round-trip quality shown next to the connection status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalLevel {
    Fast,
    Fair,
    Slow,
}

impl SignalLevel {
    pub const FAIR_MS: u64 = 100;
    pub const SLOW_MS: u64 = 300;

    pub fn from_millis(millis: u64) -> Self {
        if millis < Self::FAIR_MS {
            SignalLevel::Fast
        } else if millis < Self::SLOW_MS {
            SignalLevel::Fair
        } else {
            SignalLevel::Slow
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SignalLevel::Fast => "fast",
            SignalLevel::Fair => "fair",
            SignalLevel::Slow => "slow",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Latency {
    pub millis: u64,
    pub level: SignalLevel,
}

impl Latency {
    /// Latency of a heartbeat sent at `sent_ms` and echoed at `now_ms`.
    /// Clock skew never yields a negative value.
    pub fn between(sent_ms: i64, now_ms: i64) -> Self {
        let millis = now_ms.saturating_sub(sent_ms).max(0) as u64;
        Self {
            millis,
            level: SignalLevel::from_millis(millis),
        }
    }
}

/// Wall clock in milliseconds, the unit heartbeat timestamps use.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct TabSession {
    id: TabId,
    name: String,
    vt: VtTerminal,
    transport: Box<dyn Transport>,
    events: mpsc::UnboundedSender<ClientEvent>,
    heartbeat: Option<RepeatingTimer>,
    heartbeat_interval: Duration,
    lifecycle: Lifecycle,
    connection: ConnectionState,
    latency: Option<Latency>,
    restored: bool,
    /// Last size the server was told about on the current connection.
    sent_size: Option<TermSize>,
}

impl TabSession {
    /// Create the emulator, draw any restored content, and open the channel.
    ///
    /// The session starts in [`Lifecycle::Background`]; the manager decides
    /// which tab is active.
    pub fn open(
        id: TabId,
        name: String,
        restored: Option<&str>,
        size: TermSize,
        config: &ClientConfig,
        factory: &dyn TransportFactory,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        let mut vt = VtTerminal::with_scrollback(size.cols, size.rows, config.scrollback);

        let restored = match restored {
            Some(content) if !content.is_empty() => {
                vt.write(content.as_bytes());
                vt.write(RESTORED_MARKER.as_bytes());
                true
            }
            _ => false,
        };

        let transport = factory.connect(id, events.clone());
        let connection = transport.state();

        let mut session = Self {
            id,
            name,
            vt,
            transport,
            events,
            heartbeat: None,
            heartbeat_interval: config.heartbeat_interval,
            lifecycle: Lifecycle::Initializing,
            connection,
            latency: None,
            restored,
            sent_size: None,
        };
        session.sync_size();
        session.lifecycle = Lifecycle::Background;
        log::debug!("tab {id}: opened ({}x{})", size.cols, size.rows);
        session
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: String) {
        self.name = name;
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn latency(&self) -> Option<Latency> {
        self.latency
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    pub fn size(&self) -> TermSize {
        let (cols, rows) = self.vt.size();
        TermSize { cols, rows }
    }

    pub fn terminal(&self) -> &VtTerminal {
        &self.vt
    }

    /// Feed server output into the emulator. Any replies the emulator
    /// generates (cursor reports and the like) go back as input.
    pub fn render(&mut self, data: &str) {
        self.vt.write(data.as_bytes());
        for reply in self.vt.take_pty_writes() {
            self.send(ClientMessage::Input { data: reply });
        }
    }

    /// Forward keystrokes. Dropped while the channel is not open.
    pub fn send_input(&self, data: &str) {
        self.send(ClientMessage::Input {
            data: data.to_string(),
        });
    }

    /// Apply a new grid size and tell the server if the channel is open.
    /// Calling it again with the same size sends nothing.
    pub fn resize(&mut self, size: TermSize) {
        if self.size() != size {
            self.vt.resize(size.cols, size.rows);
        }
        self.sync_size();
    }

    pub fn on_connection(&mut self, state: ConnectionState) {
        self.connection = state;
        // Every new connection gets a fresh process at the default size.
        self.sent_size = None;
        self.sync_size();
    }

    pub fn activate(&mut self) {
        self.lifecycle = Lifecycle::Active;
        if self.heartbeat.is_none() {
            let events = self.events.clone();
            let id = self.id;
            self.heartbeat = Some(RepeatingTimer::start(self.heartbeat_interval, move || {
                events
                    .send(ClientEvent::new(id, ClientEventKind::HeartbeatDue))
                    .is_ok()
            }));
        }
    }

    pub fn deactivate(&mut self) {
        self.lifecycle = Lifecycle::Background;
        if let Some(timer) = self.heartbeat.take() {
            timer.cancel();
        }
    }

    /// Send a heartbeat stamped `now_ms`. Only the active, connected tab
    /// pings. Returns whether a heartbeat went out.
    pub fn send_heartbeat(&mut self, now_ms: i64) -> bool {
        if !self.is_active() || !self.connection.is_open() {
            return false;
        }
        self.transport
            .send(ClientMessage::Heartbeat { timestamp: now_ms })
            .is_ok()
    }

    /// Record a heartbeat echo. Echoes that arrive after the tab stopped
    /// being active are discarded.
    pub fn on_heartbeat_echo(&mut self, timestamp: i64, now_ms: i64) -> Option<Latency> {
        if !self.is_active() {
            return None;
        }
        let latency = Latency::between(timestamp, now_ms);
        self.latency = Some(latency);
        Some(latency)
    }

    pub fn snapshot(&self) -> TabSnapshot {
        TabSnapshot {
            id: self.id,
            name: self.name.clone(),
            content: self.vt.serialize(),
        }
    }

    /// Cancel the heartbeat, close the channel and release the emulator.
    pub fn destroy(mut self) {
        self.lifecycle = Lifecycle::Destroyed;
        if let Some(timer) = self.heartbeat.take() {
            timer.cancel();
        }
        self.transport.close();
        log::debug!("tab {}: destroyed", self.id);
    }

    fn sync_size(&mut self) {
        let size = self.size();
        if !self.connection.is_open() || self.sent_size == Some(size) {
            return;
        }
        if self.send(ClientMessage::resize(size)) {
            self.sent_size = Some(size);
        }
    }

    fn send(&self, message: ClientMessage) -> bool {
        match self.transport.send(message) {
            Ok(()) => true,
            Err(TransportError::NotOpen) => false,
            Err(e) => {
                log::debug!("tab {}: send dropped: {e}", self.id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFactory;

    fn open_tab(
        factory: &MockFactory,
        restored: Option<&str>,
    ) -> (TabSession, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = TabSession::open(
            1,
            "Terminal 1".to_string(),
            restored,
            TermSize::default(),
            &ClientConfig::default(),
            factory,
            tx,
        );
        (session, rx)
    }

    #[test]
    fn test_signal_levels() {
        assert_eq!(SignalLevel::from_millis(0), SignalLevel::Fast);
        assert_eq!(SignalLevel::from_millis(99), SignalLevel::Fast);
        assert_eq!(SignalLevel::from_millis(100), SignalLevel::Fair);
        assert_eq!(SignalLevel::from_millis(299), SignalLevel::Fair);
        assert_eq!(SignalLevel::from_millis(300), SignalLevel::Slow);
    }

    #[test]
    fn test_latency_never_negative() {
        assert_eq!(Latency::between(1_000, 900).millis, 0);
        assert_eq!(Latency::between(1_000, 1_042).millis, 42);
        assert_eq!(Latency::between(i64::MIN, i64::MAX).level, SignalLevel::Slow);
    }

    #[test]
    fn test_open_sends_initial_size_when_open() {
        let factory = MockFactory::open();
        let (session, _rx) = open_tab(&factory, None);
        assert_eq!(session.lifecycle(), Lifecycle::Background);
        assert_eq!(
            factory.link(1).sent(),
            vec![ClientMessage::Resize { cols: 80, rows: 30 }]
        );
    }

    #[test]
    fn test_restored_content_then_marker() {
        let factory = MockFactory::open();
        let (mut session, _rx) = open_tab(&factory, Some("old prompt $ "));
        assert!(session.is_restored());
        session.render("new output");

        let lines = session.terminal().screen().text_lines();
        let joined = lines.join("\n");
        let old = joined.find("old prompt $").unwrap();
        let marker = joined.find("--- session restored ---").unwrap();
        let new = joined.find("new output").unwrap();
        assert!(old < marker && marker < new);
    }

    #[test]
    fn test_empty_restored_content_is_not_restored() {
        let factory = MockFactory::open();
        let (session, _rx) = open_tab(&factory, Some(""));
        assert!(!session.is_restored());
    }

    #[test]
    fn test_resize_is_idempotent_and_waits_for_open() {
        let factory = MockFactory::starting_in(ConnectionState::Connecting);
        let (mut session, _rx) = open_tab(&factory, None);
        let link = factory.link(1);

        session.resize(TermSize { cols: 100, rows: 40 });
        assert!(link.sent().is_empty());
        assert_eq!(session.size(), TermSize { cols: 100, rows: 40 });

        link.set_state(ConnectionState::Open);
        session.on_connection(ConnectionState::Open);
        session.resize(TermSize { cols: 100, rows: 40 });
        assert_eq!(
            link.take_sent(),
            vec![ClientMessage::Resize { cols: 100, rows: 40 }]
        );

        // Reconnect: the new process must learn the size again.
        link.set_state(ConnectionState::Disconnected);
        session.on_connection(ConnectionState::Disconnected);
        link.set_state(ConnectionState::Open);
        session.on_connection(ConnectionState::Open);
        assert_eq!(
            link.take_sent(),
            vec![ClientMessage::Resize { cols: 100, rows: 40 }]
        );
    }

    #[test]
    fn test_input_dropped_while_not_open() {
        let factory = MockFactory::starting_in(ConnectionState::Disconnected);
        let (session, _rx) = open_tab(&factory, None);
        session.send_input("ls\n");
        assert!(factory.link(1).sent().is_empty());
    }

    #[test]
    fn test_device_status_reply_goes_back_as_input() {
        let factory = MockFactory::open();
        let (mut session, _rx) = open_tab(&factory, None);
        let link = factory.link(1);
        link.take_sent();

        session.render("\x1b[6n");
        let sent = link.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], ClientMessage::Input { data } if data.ends_with('R')));
    }

    #[tokio::test]
    async fn test_heartbeat_only_while_active() {
        let factory = MockFactory::open();
        let (mut session, _rx) = open_tab(&factory, None);
        let link = factory.link(1);
        link.take_sent();

        assert!(!session.send_heartbeat(10));
        session.activate();
        assert!(session.send_heartbeat(10));
        assert_eq!(link.take_sent(), vec![ClientMessage::Heartbeat { timestamp: 10 }]);

        assert_eq!(
            session.on_heartbeat_echo(10, 60),
            Some(Latency {
                millis: 50,
                level: SignalLevel::Fast
            })
        );

        session.deactivate();
        assert_eq!(session.on_heartbeat_echo(10, 500), None);
        assert_eq!(session.latency().map(|l| l.millis), Some(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timer_emits_events() {
        let factory = MockFactory::open();
        let (mut session, mut rx) = open_tab(&factory, None);
        session.activate();

        tokio::time::sleep(Duration::from_millis(4_100)).await;
        let mut ticks = 0;
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event, ClientEvent::new(1, ClientEventKind::HeartbeatDue));
            ticks += 1;
        }
        assert_eq!(ticks, 2);

        session.deactivate();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_destroy_closes_transport_mid_reconnect() {
        let factory = MockFactory::starting_in(ConnectionState::Error);
        let (mut session, _rx) = open_tab(&factory, None);
        session.activate();
        session.destroy();
        assert!(factory.link(1).is_closed());
    }

    #[test]
    fn test_snapshot_carries_screen() {
        let factory = MockFactory::open();
        let (mut session, _rx) = open_tab(&factory, None);
        session.render("$ ls\r\nfile.txt\r\n");
        let snapshot = session.snapshot();
        assert_eq!(snapshot.id, 1);
        assert_eq!(snapshot.name, "Terminal 1");
        assert!(snapshot.content.contains("file.txt"));
    }
}
