use wired_proto::ServerMessage;

use crate::session::TabId;
use crate::transport::ConnectionState;

/// Something that happened to one tab, delivered to the driver loop.
///
/// Every channel and timer pushes into one queue tagged with the owning
/// tab's id. Events for a tab that no longer exists are dropped on lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientEvent {
    pub tab: TabId,
    pub kind: ClientEventKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEventKind {
    /// The tab's channel changed state.
    Connection(ConnectionState),
    /// A message arrived on the tab's channel.
    Message(ServerMessage),
    /// The tab's heartbeat timer fired.
    HeartbeatDue,
}

impl ClientEvent {
    pub fn new(tab: TabId, kind: ClientEventKind) -> Self {
        Self { tab, kind }
    }
}
