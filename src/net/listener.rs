//! Listening socket multiplexing its accepted connections.
//!
//! Each [`Listener::poll`] performs one zero-timeout readiness check across the
//! listening socket and every accepted connection, then:
//!
//! - accepts at most one pending connection (`on_client_connect`);
//! - reads once from every connection that was ready before this poll
//!   (`on_client_recv`, or `on_client_disconnect` on a zero-length read).
//!
//! `mio` readiness is edge-triggered, so readiness is remembered per socket
//! until a read or accept reports `WouldBlock`. This gives the level-triggered
//! "readable until drained" behaviour protocol code expects.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use super::connection::{is_transient, DEFAULT_READ_BUFFER};
use super::handler::{ClientId, DisconnectReason, ListenerHandler};
use crate::core::{ListenError, Module, ModuleError};

const LISTENER: Token = Token(0);
const EVENT_CAPACITY: usize = 256;

struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    readable: bool,
}

struct Bound {
    socket: TcpListener,
    poll: Poll,
    local_addr: SocketAddr,
}

/// Server-side transport accepting and multiplexing connections.
pub struct Listener<H: ListenerHandler> {
    handler: H,
    bound: Option<Bound>,
    events: Events,
    clients: BTreeMap<ClientId, Client>,
    next_id: ClientId,
    accept_ready: bool,
    read_buf: Box<[u8]>,
}

impl<H: ListenerHandler> Listener<H> {
    /// Create an unbound listener reporting to `handler`.
    pub fn new(handler: H) -> Self {
        Self::with_buffer_size(handler, DEFAULT_READ_BUFFER)
    }

    /// Create an unbound listener reading at most `size` bytes per client per poll.
    pub fn with_buffer_size(handler: H, size: usize) -> Self {
        Self {
            handler,
            bound: None,
            events: Events::with_capacity(EVENT_CAPACITY),
            clients: BTreeMap::new(),
            next_id: 1,
            accept_ready: false,
            read_buf: vec![0; size.max(1)].into_boxed_slice(),
        }
    }

    /// Bind `addr` and start accepting. Returns the bound address, which
    /// differs from `addr` when port 0 was requested.
    ///
    /// A listener that is already bound is closed first.
    ///
    /// # Errors
    ///
    /// `ListenError::BindFailed` when the address cannot be bound,
    /// `ListenError::ListenFailed` when readiness polling cannot be set up.
    pub fn listen(&mut self, addr: SocketAddr) -> Result<SocketAddr, ListenError> {
        self.close();
        let mut socket =
            TcpListener::bind(addr).map_err(|source| ListenError::BindFailed { addr, source })?;
        let poll = Poll::new().map_err(|source| ListenError::ListenFailed { addr, source })?;
        poll.registry()
            .register(&mut socket, LISTENER, Interest::READABLE)
            .map_err(|source| ListenError::ListenFailed { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| ListenError::ListenFailed { addr, source })?;

        tracing::info!(%local_addr, "listening");
        self.bound = Some(Bound {
            socket,
            poll,
            local_addr,
        });
        self.accept_ready = true;
        Ok(local_addr)
    }

    /// Bound address, if listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.as_ref().map(|b| b.local_addr)
    }

    /// Whether `listen` succeeded and `close` has not been called since.
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.bound.is_some()
    }

    /// The injected handler.
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    /// Mutable access to the injected handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Identifiers of live accepted connections, ascending.
    #[must_use]
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    /// Number of live accepted connections.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Remote address of an accepted connection.
    #[must_use]
    pub fn client_peer(&self, id: ClientId) -> Option<SocketAddr> {
        self.clients.get(&id).map(|c| c.peer)
    }

    /// One non-blocking readiness pass. Does nothing when not listening.
    pub fn poll(&mut self) {
        let Some(bound) = self.bound.as_mut() else {
            return;
        };
        if let Err(err) = bound.poll.poll(&mut self.events, Some(Duration::ZERO)) {
            if err.kind() != io::ErrorKind::Interrupted {
                tracing::warn!(error = %err, "readiness poll failed");
            }
            return;
        }
        for event in &self.events {
            match event.token() {
                LISTENER => self.accept_ready = true,
                Token(id) => {
                    if let Some(client) = self.clients.get_mut(&id) {
                        client.readable = true;
                    }
                }
            }
        }

        let ready: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, c)| c.readable)
            .map(|(id, _)| *id)
            .collect();

        if self.accept_ready {
            self.accept_one();
        }
        for id in ready {
            self.read_client(id);
        }
    }

    /// Write once to one connection without blocking.
    ///
    /// Mirrors [`Connection::send`](super::Connection::send): no internal
    /// retry, `on_client_send` reports the accepted prefix, a hard error drops
    /// the connection and returns `Ok(0)`.
    ///
    /// # Errors
    ///
    /// `ListenError::UnknownClient` if `id` is not live.
    pub fn send(&mut self, id: ClientId, data: &[u8]) -> Result<usize, ListenError> {
        let client = self
            .clients
            .get_mut(&id)
            .ok_or(ListenError::UnknownClient(id))?;
        match client.stream.write(data) {
            Ok(written) => {
                self.handler.on_client_send(id, &data[..written]);
                Ok(written)
            }
            Err(err) if is_transient(&err) => {
                self.handler.on_client_send(id, &[]);
                Ok(0)
            }
            Err(err) => {
                self.drop_client(id, DisconnectReason::TransportError(err.to_string()));
                Ok(0)
            }
        }
    }

    /// [`send`](Self::send) to every live connection, in identifier order.
    /// Returns `(id, bytes written)` per connection.
    pub fn broadcast(&mut self, data: &[u8]) -> Vec<(ClientId, usize)> {
        self.client_ids()
            .into_iter()
            .filter_map(|id| self.send(id, data).ok().map(|n| (id, n)))
            .collect()
    }

    /// Close one accepted connection (`on_client_disconnect(LocalRequest)`).
    ///
    /// # Errors
    ///
    /// `ListenError::UnknownClient` if `id` is not live.
    pub fn disconnect_client(&mut self, id: ClientId) -> Result<(), ListenError> {
        if !self.clients.contains_key(&id) {
            return Err(ListenError::UnknownClient(id));
        }
        self.drop_client(id, DisconnectReason::LocalRequest);
        Ok(())
    }

    /// Drop every accepted connection and stop listening.
    pub fn close(&mut self) {
        for id in self.client_ids() {
            self.drop_client(id, DisconnectReason::LocalRequest);
        }
        if let Some(bound) = self.bound.take() {
            tracing::info!(local_addr = %bound.local_addr, "listener closed");
        }
        self.accept_ready = false;
    }

    fn accept_one(&mut self) {
        let Some(bound) = self.bound.as_ref() else {
            return;
        };
        match bound.socket.accept() {
            Ok((mut stream, peer)) => {
                let id = self.next_id;
                self.next_id += 1;
                if let Err(err) =
                    bound
                        .poll
                        .registry()
                        .register(&mut stream, Token(id), Interest::READABLE)
                {
                    tracing::warn!(%peer, error = %err, "dropping accepted connection");
                    return;
                }
                self.clients.insert(
                    id,
                    Client {
                        stream,
                        peer,
                        readable: true,
                    },
                );
                tracing::info!(id, %peer, "client accepted");
                self.handler.on_client_connect(id, peer);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                if err.kind() != io::ErrorKind::WouldBlock {
                    tracing::warn!(error = %err, "accept failed");
                }
                self.accept_ready = false;
            }
        }
    }

    fn read_client(&mut self, id: ClientId) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        match client.stream.read(&mut self.read_buf) {
            Ok(0) => self.drop_client(id, DisconnectReason::PeerClosed),
            Ok(n) => self.handler.on_client_recv(id, &self.read_buf[..n]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if let Some(client) = self.clients.get_mut(&id) {
                    client.readable = false;
                }
            }
            Err(err) if is_transient(&err) => {}
            Err(err) => self.drop_client(id, DisconnectReason::TransportError(err.to_string())),
        }
    }

    fn drop_client(&mut self, id: ClientId, reason: DisconnectReason) {
        let Some(mut client) = self.clients.remove(&id) else {
            return;
        };
        if let Some(bound) = self.bound.as_ref() {
            if let Err(err) = bound.poll.registry().deregister(&mut client.stream) {
                tracing::trace!(id, error = %err, "deregister on drop");
            }
        }
        if let Err(err) = client.stream.shutdown(Shutdown::Both) {
            tracing::trace!(id, error = %err, "shutdown on drop");
        }
        tracing::info!(id, peer = %client.peer, reason = %reason, "client disconnected");
        self.handler.on_client_disconnect(id, reason);
    }
}

impl<H: ListenerHandler> Module for Listener<H> {
    fn iterate(&mut self) -> Result<(), ModuleError> {
        self.poll();
        Ok(())
    }
}
