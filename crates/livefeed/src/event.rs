use core::{fmt, time::Duration};

use bytes::Bytes;
use url::Url;

use crate::error::TransportError;

/// Identifies one request or one timer issued by a connection.
///
/// `slot` tells the two halves of a
/// [`PersistentConnectionPair`](crate::PersistentConnectionPair) apart;
/// `seq` is never reused by a connection, so anything reported for a token
/// that was aborted or cancelled can be recognised and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token {
    pub slot: u8,
    pub seq: u64,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.seq)
    }
}

/// Work a connection asks its I/O driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start a request against `url` and report its progress with `token`.
    Open { token: Token, url: Url },
    /// Tear down the request started for `token`. Nothing it reports from now
    /// on is delivered.
    Abort { token: Token },
    /// Call back with `token` once `delay` has elapsed.
    StartTimer { token: Token, delay: Duration },
    CancelTimer { token: Token },
}

/// What the transport reports about one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The response was accepted and the body starts streaming.
    Opened,
    /// Newly received bytes, in arrival order.
    Data(Bytes),
    /// The body ended cleanly.
    End,
    Error(TransportError),
}

/// Notifications for the owner of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A first connection attempt started.
    Connecting,
    Connected,
    /// A replacement connection took over without a gap.
    Reconnected,
    Data(Bytes),
    /// The active stream ended gracefully.
    End,
    Error(TransportError),
    ReconnectScheduled { delay: Duration },
    /// A scheduled or forced reconnect attempt started.
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Command(Command),
    Event(ConnectionEvent),
}

impl From<Command> for Output {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

impl From<ConnectionEvent> for Output {
    fn from(event: ConnectionEvent) -> Self {
        Self::Event(event)
    }
}
