//! Per-tab channel to the server.
//!
//! Each tab owns one [`Transport`]. Tabs never share a connection, so a
//! reconnect storm on one tab cannot stall another tab's input or output.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wired_proto::{ClientMessage, ServerMessage};

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::event::{ClientEvent, ClientEventKind};
use crate::session::TabId;

/// Observable state of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Connection lost; a retry is scheduled.
    Disconnected,
    /// The last attempt failed; a retry is scheduled.
    Error,
    /// Terminal: closed by the tab, by the server, or out of retries.
    Closed,
}

impl ConnectionState {
    /// Text for the status indicator.
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Open => "Connected",
            ConnectionState::Disconnected | ConnectionState::Closed => "Disconnected",
            ConnectionState::Error => "Error",
        }
    }

    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

/// Errors from sending on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The channel is not open; the message was dropped.
    NotOpen,
    /// The channel has been closed for good.
    Closed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::NotOpen => write!(f, "channel is not open"),
            TransportError::Closed => write!(f, "channel is closed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A duplex message channel owned by one tab.
pub trait Transport: Send {
    fn state(&self) -> ConnectionState;

    /// Queue a message. Fails with [`TransportError::NotOpen`] while the
    /// channel is connecting or retrying.
    fn send(&self, message: ClientMessage) -> Result<(), TransportError>;

    /// Close the channel and cancel any pending retry. Idempotent.
    fn close(&mut self);
}

/// Creates one fresh transport per tab.
pub trait TransportFactory: Send {
    /// Open a channel for `tab`. State changes and incoming messages are
    /// pushed into `events` tagged with `tab`.
    fn connect(
        &self,
        tab: TabId,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Box<dyn Transport>;
}

/// Opens [`WsTransport`]s against one server URL.
#[derive(Clone, Debug)]
pub struct WsTransportFactory {
    url: String,
    policy: ReconnectPolicy,
}

impl WsTransportFactory {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            url: url.into(),
            policy,
        }
    }

    /// Factory for the server and retry policy named in `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.server_url.clone(), config.reconnect)
    }
}

impl TransportFactory for WsTransportFactory {
    fn connect(
        &self,
        tab: TabId,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Box<dyn Transport> {
        Box::new(WsTransport::connect(tab, self.url.clone(), self.policy, events))
    }
}

/// WebSocket channel with bounded, fixed-delay reconnection.
///
/// The connection lives in a background task. Dropping the outbound sender
/// (via [`Transport::close`] or drop) is the task's stop signal.
pub struct WsTransport {
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    state: watch::Receiver<ConnectionState>,
}

impl WsTransport {
    /// Start connecting. Must be called inside a tokio runtime.
    pub fn connect(
        tab: TabId,
        url: String,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let link = Link {
            tab,
            state: state_tx,
            events,
        };
        tokio::spawn(run_channel(link, url, policy, outbound_rx));

        Self {
            outbound: Some(outbound_tx),
            state: state_rx,
        }
    }
}

impl Transport for WsTransport {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        if !self.state().is_open() {
            return Err(TransportError::NotOpen);
        }
        outbound.send(message).map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        self.outbound = None;
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// State publishing half shared by the channel task.
struct Link {
    tab: TabId,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Link {
    /// Publish a state change. Returns `false` once nobody is listening.
    fn set_state(&self, state: ConnectionState) -> bool {
        self.state.send_replace(state);
        self.emit(ClientEventKind::Connection(state))
    }

    fn emit(&self, kind: ClientEventKind) -> bool {
        self.events.send(ClientEvent::new(self.tab, kind)).is_ok()
    }
}

/// How one connected session ended.
enum SessionEnd {
    /// The tab closed the channel.
    Stopped,
    /// The server sent a close frame.
    ServerClosed,
    /// The network dropped underneath us.
    Lost,
}

async fn run_channel(
    link: Link,
    url: String,
    policy: ReconnectPolicy,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
) {
    let mut failures: u32 = 0;

    loop {
        if !link.set_state(ConnectionState::Connecting) {
            break;
        }

        let connecting = tokio::time::timeout(policy.connect_timeout, connect_async(url.as_str()));
        tokio::pin!(connecting);
        let attempt = loop {
            tokio::select! {
                result = &mut connecting => break Some(result),
                message = outbound.recv() => {
                    // Writes while not open are dropped.
                    if message.is_none() {
                        break None;
                    }
                }
            }
        };
        let Some(attempt) = attempt else {
            break;
        };

        match attempt {
            Ok(Ok((socket, _))) => {
                failures = 0;
                if !link.set_state(ConnectionState::Open) {
                    break;
                }
                match pump(&link, socket, &mut outbound).await {
                    SessionEnd::Stopped => break,
                    SessionEnd::ServerClosed => {
                        log::info!("tab {}: server closed the channel", link.tab);
                        break;
                    }
                    SessionEnd::Lost => {
                        log::warn!("tab {}: connection lost", link.tab);
                        if !link.set_state(ConnectionState::Disconnected) {
                            break;
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                log::warn!("tab {}: connect to {url} failed: {e}", link.tab);
                if !link.set_state(ConnectionState::Error) {
                    break;
                }
            }
            Err(_) => {
                log::warn!(
                    "tab {}: connect to {url} timed out after {:?}",
                    link.tab,
                    policy.connect_timeout
                );
                if !link.set_state(ConnectionState::Error) {
                    break;
                }
            }
        }

        failures += 1;
        if failures > policy.max_attempts {
            log::warn!("tab {}: giving up after {} attempts", link.tab, policy.max_attempts);
            break;
        }

        let delay = tokio::time::sleep(policy.delay);
        tokio::pin!(delay);
        let stopped = loop {
            tokio::select! {
                _ = &mut delay => break false,
                message = outbound.recv() => {
                    if message.is_none() {
                        break true;
                    }
                }
            }
        };
        if stopped {
            break;
        }
    }

    link.set_state(ConnectionState::Closed);
}

/// Shuttle messages until the socket or the tab goes away.
async fn pump(
    link: &Link,
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound: &mut mpsc::UnboundedReceiver<ClientMessage>,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => {
                    let json = match message.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            log::warn!("tab {}: dropping unencodable message: {e}", link.tab);
                            continue;
                        }
                    };
                    if sink.send(Message::Text(json)).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return SessionEnd::Stopped;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text) {
                    Ok(message) => {
                        if !link.emit(ClientEventKind::Message(message)) {
                            return SessionEnd::Stopped;
                        }
                    }
                    Err(e) => log::warn!("tab {}: ignoring malformed frame: {e}", link.tab),
                },
                Some(Ok(Message::Close(_))) => return SessionEnd::ServerClosed,
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return SessionEnd::Lost,
            },
        }
    }
}
