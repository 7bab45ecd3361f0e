//! Non-blocking outbound connection.
//!
//! ```text
//!  Disconnected ──connect()──► Connecting ──poll: established──► Connected
//!       ▲                          │                                 │
//!       │◄──poll: connect failed───┘                                 │
//!       │◄──────────── poll: peer closed / disconnect() ─────────────┘
//! ```
//!
//! Every transition into `Connected` or `Disconnected` fires exactly one
//! callback. Reconnect policy belongs to the owner, which simply calls
//! [`Connection::connect`] again once the state is back to `Disconnected`.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use mio::net::TcpStream;
use serde::{Deserialize, Serialize};

use super::handler::{ConnectionHandler, DisconnectReason};
use crate::core::{ConnectionError, Module, ModuleError};

/// Read buffer size used when none is configured.
pub const DEFAULT_READ_BUFFER: usize = 4096;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport. `connect` is legal.
    Disconnected,
    /// Transport-level connect in flight.
    Connecting,
    /// Established; `send` and reads are live.
    Connected,
}

/// A single non-blocking TCP client endpoint.
pub struct Connection<H: ConnectionHandler> {
    handler: H,
    state: ConnectionState,
    stream: Option<TcpStream>,
    remote: Option<SocketAddr>,
    /// Synchronous connect error, reported on the next poll.
    pending_failure: Option<io::Error>,
    read_buf: Box<[u8]>,
}

impl<H: ConnectionHandler> Connection<H> {
    /// Create a disconnected endpoint reporting to `handler`.
    pub fn new(handler: H) -> Self {
        Self::with_buffer_size(handler, DEFAULT_READ_BUFFER)
    }

    /// Create an endpoint reading at most `size` bytes per poll.
    pub fn with_buffer_size(handler: H, size: usize) -> Self {
        Self {
            handler,
            state: ConnectionState::Disconnected,
            stream: None,
            remote: None,
            pending_failure: None,
            read_buf: vec![0; size.max(1)].into_boxed_slice(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Address passed to the last `connect`, while not disconnected.
    #[must_use]
    pub const fn peer_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// The injected handler.
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    /// Mutable access to the injected handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Start a non-blocking connect.
    ///
    /// OS-level failures are not returned here; they surface on the next
    /// [`poll`](Self::poll) as `on_disconnect(ConnectFailed)`.
    ///
    /// # Errors
    ///
    /// `ConnectionError::AlreadyConnected` unless the state is `Disconnected`;
    /// the state is left untouched.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ConnectionError::AlreadyConnected);
        }
        match TcpStream::connect(addr) {
            Ok(stream) => self.stream = Some(stream),
            Err(err) => self.pending_failure = Some(err),
        }
        self.remote = Some(addr);
        self.state = ConnectionState::Connecting;
        tracing::info!(%addr, "connecting");
        Ok(())
    }

    /// Parse `addr` as a socket address literal and connect to it.
    ///
    /// # Errors
    ///
    /// `ConnectionError::InvalidAddress` for unparsable input, otherwise as
    /// [`connect`](Self::connect).
    pub fn connect_str(&mut self, addr: &str) -> Result<(), ConnectionError> {
        let parsed: SocketAddr = addr
            .parse()
            .map_err(|_| ConnectionError::InvalidAddress(addr.to_string()))?;
        self.connect(parsed)
    }

    /// Advance the state machine by one non-blocking step.
    pub fn poll(&mut self) {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting => self.poll_connecting(),
            ConnectionState::Connected => self.poll_read(),
        }
    }

    /// Write once without blocking and report the accepted prefix.
    ///
    /// Short writes are not retried; the caller owns the remainder. A hard
    /// write error closes the connection (`on_disconnect(TransportError)`) and
    /// returns `Ok(0)`.
    ///
    /// # Errors
    ///
    /// `ConnectionError::NotConnected` unless the state is `Connected`;
    /// `on_send` is not invoked.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;
        match stream.write(data) {
            Ok(written) => {
                self.handler.on_send(&data[..written]);
                Ok(written)
            }
            Err(err) if is_transient(&err) => {
                self.handler.on_send(&[]);
                Ok(0)
            }
            Err(err) => {
                self.close(DisconnectReason::TransportError(err.to_string()));
                Ok(0)
            }
        }
    }

    /// Close the transport. A no-op while already disconnected.
    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.close(DisconnectReason::LocalRequest);
        }
    }

    fn poll_connecting(&mut self) {
        if let Some(err) = self.pending_failure.take() {
            self.close(DisconnectReason::ConnectFailed(err.to_string()));
            return;
        }
        let Some(stream) = self.stream.as_ref() else {
            self.close(DisconnectReason::ConnectFailed("no transport".into()));
            return;
        };

        let status = match stream.take_error() {
            Ok(Some(err)) | Err(err) => Err(err),
            Ok(None) => stream.peer_addr(),
        };
        match status {
            Ok(peer) => {
                self.remote = Some(peer);
                self.state = ConnectionState::Connected;
                tracing::info!(%peer, "connected");
                self.handler.on_connect();
            }
            Err(err) if err.kind() == io::ErrorKind::NotConnected => {}
            Err(err) if is_transient(&err) => {}
            Err(err) => self.close(DisconnectReason::ConnectFailed(err.to_string())),
        }
    }

    fn poll_read(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            self.close(DisconnectReason::TransportError("no transport".into()));
            return;
        };
        match stream.read(&mut self.read_buf) {
            Ok(0) => self.close(DisconnectReason::PeerClosed),
            Ok(n) => self.handler.on_recv(&self.read_buf[..n]),
            Err(err) if is_transient(&err) => {}
            Err(err) => self.close(DisconnectReason::TransportError(err.to_string())),
        }
    }

    fn close(&mut self, reason: DisconnectReason) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.shutdown(Shutdown::Both) {
                tracing::trace!(error = %err, "shutdown on close");
            }
        }
        self.pending_failure = None;
        self.state = ConnectionState::Disconnected;
        let peer = self.remote.take();
        tracing::info!(peer = ?peer, reason = %reason, "disconnected");
        self.handler.on_disconnect(reason);
    }
}

impl<H: ConnectionHandler> Module for Connection<H> {
    fn iterate(&mut self) -> Result<(), ModuleError> {
        self.poll();
        Ok(())
    }
}

pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
