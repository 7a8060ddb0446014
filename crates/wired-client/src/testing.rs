//! In-memory transports and a loopback echo server for tab, transport and
//! manager tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;
use wired_proto::{ClientMessage, ServerMessage};

use crate::event::ClientEvent;
use crate::session::TabId;
use crate::transport::{ConnectionState, Transport, TransportError, TransportFactory};

#[derive(Debug)]
struct LinkState {
    state: ConnectionState,
    sent: Vec<ClientMessage>,
    closed: bool,
}

/// Test-side view of one tab's channel.
#[derive(Clone, Debug)]
pub(crate) struct MockLink {
    inner: Arc<Mutex<LinkState>>,
}

impl MockLink {
    fn new(state: ConnectionState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LinkState {
                state,
                sent: Vec::new(),
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.inner.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.lock().state = state;
    }

    pub(crate) fn sent(&self) -> Vec<ClientMessage> {
        self.lock().sent.clone()
    }

    pub(crate) fn take_sent(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.lock().sent)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

struct MockTransport {
    link: MockLink,
}

impl Transport for MockTransport {
    fn state(&self) -> ConnectionState {
        self.link.lock().state
    }

    fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        let mut link = self.link.lock();
        if link.closed {
            return Err(TransportError::Closed);
        }
        if link.state != ConnectionState::Open {
            return Err(TransportError::NotOpen);
        }
        link.sent.push(message);
        Ok(())
    }

    fn close(&mut self) {
        let mut link = self.link.lock();
        link.closed = true;
        link.state = ConnectionState::Closed;
    }
}

/// Hands out [`MockTransport`]s and remembers each tab's link.
#[derive(Clone)]
pub(crate) struct MockFactory {
    initial: ConnectionState,
    links: Arc<Mutex<HashMap<TabId, MockLink>>>,
}

impl MockFactory {
    /// Channels start out open.
    pub(crate) fn open() -> Self {
        Self::starting_in(ConnectionState::Open)
    }

    pub(crate) fn starting_in(initial: ConnectionState) -> Self {
        Self {
            initial,
            links: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The most recent link opened for `tab`.
    pub(crate) fn link(&self, tab: TabId) -> MockLink {
        self.links
            .lock()
            .unwrap()
            .get(&tab)
            .cloned()
            .unwrap_or_else(|| panic!("no transport opened for tab {tab}"))
    }

    pub(crate) fn opened(&self) -> usize {
        self.links.lock().unwrap().len()
    }
}

impl TransportFactory for MockFactory {
    fn connect(
        &self,
        tab: TabId,
        _events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Box<dyn Transport> {
        let link = MockLink::new(self.initial);
        self.links.lock().unwrap().insert(tab, link.clone());
        Box::new(MockTransport { link })
    }
}

/// Axum WebSocket endpoint on a loopback port. Input comes back as output,
/// heartbeats are echoed, and every closed connection is reported.
pub(crate) struct EchoServer {
    pub(crate) url: String,
    disconnects: mpsc::UnboundedReceiver<()>,
}

impl EchoServer {
    pub(crate) async fn start() -> Self {
        let (disconnect_tx, disconnects) = mpsc::unbounded_channel();
        let router = Router::new()
            .route("/ws", get(echo_handler))
            .with_state(disconnect_tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            url: format!("ws://{addr}/ws"),
            disconnects,
        }
    }

    /// Wait up to five seconds for one client connection to end.
    pub(crate) async fn wait_for_disconnect(&mut self) {
        tokio::time::timeout(Duration::from_secs(5), self.disconnects.recv())
            .await
            .expect("no connection closed")
            .expect("echo server stopped");
    }
}

async fn echo_handler(
    State(disconnects): State<mpsc::UnboundedSender<()>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        echo(socket).await;
        let _ = disconnects.send(());
    })
}

async fn echo(mut socket: WebSocket) {
    while let Some(Ok(frame)) = socket.recv().await {
        let Message::Text(text) = frame else {
            continue;
        };
        let reply = match ClientMessage::from_json(&text) {
            Ok(ClientMessage::Input { data }) => ServerMessage::Output { data },
            Ok(ClientMessage::Heartbeat { timestamp }) => ServerMessage::Heartbeat { timestamp },
            _ => continue,
        };
        if socket
            .send(Message::Text(reply.to_json().unwrap()))
            .await
            .is_err()
        {
            return;
        }
    }
}
