//! Callback capabilities implemented by protocol code.
//!
//! A transport holds exactly one handler, injected at construction. Every
//! lifecycle transition fires exactly one callback, from inside the transport's
//! own `poll`, `send` or `disconnect` call.

use std::fmt;
use std::net::SocketAddr;

/// Identifier of a connection accepted by a [`Listener`](super::Listener).
///
/// Issued in increasing order starting at 1 and never reused for the lifetime
/// of the listener.
pub type ClientId = usize;

/// Why a connection moved to `Disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The outbound connect did not complete.
    ConnectFailed(String),
    /// The peer closed its side (zero-length read).
    PeerClosed,
    /// `disconnect` was called locally.
    LocalRequest,
    /// A read or write failed with an OS-level error.
    TransportError(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(reason) => write!(f, "connect failed: {reason}"),
            Self::PeerClosed => f.write_str("peer closed"),
            Self::LocalRequest => f.write_str("local request"),
            Self::TransportError(reason) => write!(f, "transport error: {reason}"),
        }
    }
}

/// Callbacks for a single outbound [`Connection`](super::Connection).
pub trait ConnectionHandler: Send {
    /// The transport finished connecting.
    fn on_connect(&mut self);

    /// The connection is gone; `connect` may be called again.
    fn on_disconnect(&mut self, reason: DisconnectReason);

    /// Bytes accepted by the transport for one `send` attempt (possibly empty).
    fn on_send(&mut self, _written: &[u8]) {}

    /// Bytes exactly as read from the transport. No framing is applied.
    fn on_recv(&mut self, data: &[u8]);
}

/// Callbacks for a [`Listener`](super::Listener) and its accepted connections.
pub trait ListenerHandler: Send {
    /// A new connection was accepted.
    fn on_client_connect(&mut self, id: ClientId, peer: SocketAddr);

    /// An accepted connection is gone; its identifier is retired.
    fn on_client_disconnect(&mut self, id: ClientId, reason: DisconnectReason);

    /// Bytes accepted by the transport for one `send` attempt (possibly empty).
    fn on_client_send(&mut self, _id: ClientId, _written: &[u8]) {}

    /// Bytes exactly as read from an accepted connection.
    fn on_client_recv(&mut self, id: ClientId, data: &[u8]);
}
