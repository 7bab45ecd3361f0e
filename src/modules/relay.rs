//! Bus-bridged line relays.
//!
//! [`RelayClient`] keeps one outbound link alive and [`RelayServer`] accepts
//! downstream clients. Neither parses IRC: both frame bytes into lines with a
//! [`LineBuffer`] and move them across the bus, so protocol modules only ever
//! talk to the bus.
//!
//! | direction | message |
//! |---|---|
//! | published by client | `relay/connected`, `relay/disconnected {reason}`, `relay/line {line}` |
//! | consumed by client | `relay/send {line}` |
//! | published by server | `relay/client-connected {client, peer}`, `relay/client-line {client, line}`, `relay/client-disconnected {client, reason}` |
//! | consumed by server | `relay/client-send {client, line}`, `relay/broadcast {line}` |
//!
//! Every message carries the module's `alias`. Transports write at most once
//! per call, so each relay keeps its own pending bytes and retries them on
//! later ticks.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::dns;
use crate::bus::{Filter, Message, MessageBus, SubscriptionId};
use crate::core::{ConnectionError, ListenError, Module, ModuleError};
use crate::net::{
    encode_line, ClientId, Connection, ConnectionHandler, ConnectionState, DisconnectReason,
    LineBuffer, Listener, ListenerHandler, DEFAULT_READ_BUFFER,
};
use crate::util::clock::{system_clock, SharedClock};

/// Bus protocol name used by relays.
pub const PROTOCOL: &str = "relay";
/// Pending outbound bytes kept per link before new lines are dropped.
pub const MAX_PENDING: usize = 1 << 20;

fn relay_message(action: &str, alias: &str) -> Message {
    Message::new(PROTOCOL, action).with("alias", alias)
}

/// Build a `relay/send` request for a client link.
pub fn send_request(alias: &str, line: &str) -> Message {
    relay_message("send", alias).with("line", line)
}

/// Build a `relay/client-send` request for one downstream client.
pub fn client_send_request(alias: &str, client: ClientId, line: &str) -> Message {
    relay_message("client-send", alias)
        .with("client", client)
        .with("line", line)
}

/// Build a `relay/broadcast` request for every downstream client.
pub fn broadcast_request(alias: &str, line: &str) -> Message {
    relay_message("broadcast", alias).with("line", line)
}

fn queue_line(pending: &mut Vec<u8>, line: &str, alias: &str) {
    let encoded = encode_line(line);
    if pending.len() + encoded.len() > MAX_PENDING {
        tracing::warn!(alias = %alias, pending = pending.len(), "send queue full, line dropped");
        return;
    }
    pending.extend_from_slice(&encoded);
}

// ============================================================================
// Client
// ============================================================================

/// Where a client link connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayTarget {
    /// Socket address literal.
    Addr(SocketAddr),
    /// Hostname resolved through the bus before each connect.
    Host {
        /// Hostname.
        host: String,
        /// TCP port.
        port: u16,
    },
}

impl RelayTarget {
    /// Parse `ip:port`, `[v6]:port` or `host:port`.
    ///
    /// # Errors
    ///
    /// `ConnectionError::InvalidAddress` when there is no valid port or host.
    pub fn parse(address: &str) -> Result<Self, ConnectionError> {
        if let Ok(addr) = address.parse::<SocketAddr>() {
            return Ok(Self::Addr(addr));
        }
        let invalid = || ConnectionError::InvalidAddress(address.to_string());
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if !dns::is_valid_host(host) {
            return Err(invalid());
        }
        Ok(Self::Host {
            host: host.to_string(),
            port,
        })
    }
}

/// Settings of one outbound relay link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayClientSettings {
    /// Alias carried in every message.
    pub alias: String,
    /// Remote endpoint.
    pub target: RelayTarget,
    /// Delay before reconnecting after a remote-side disconnect. Zero disables.
    pub reconnect: Duration,
    /// Bytes read per tick.
    pub read_buffer_size: usize,
}

impl RelayClientSettings {
    /// Settings with no reconnect and the default buffer size.
    pub fn new(alias: impl Into<String>, target: RelayTarget) -> Self {
        Self {
            alias: alias.into(),
            target,
            reconnect: Duration::ZERO,
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }
}

struct LinkHandler {
    alias: String,
    bus: MessageBus,
    lines: LineBuffer,
    last_disconnect: Option<DisconnectReason>,
}

impl ConnectionHandler for LinkHandler {
    fn on_connect(&mut self) {
        self.bus.publish(&relay_message("connected", &self.alias));
    }

    fn on_disconnect(&mut self, reason: DisconnectReason) {
        self.lines = LineBuffer::new();
        self.bus.publish(
            &relay_message("disconnected", &self.alias).with("reason", reason.to_string()),
        );
        self.last_disconnect = Some(reason);
    }

    fn on_recv(&mut self, data: &[u8]) {
        for line in self.lines.push(data) {
            self.bus
                .publish(&relay_message("line", &self.alias).with("line", line));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lookup {
    Idle,
    Waiting,
    Answered(String),
}

/// Outbound link bridged onto the bus, reconnecting on its own.
pub struct RelayClient {
    alias: String,
    target: RelayTarget,
    reconnect: Duration,
    conn: Connection<LinkHandler>,
    outbox: Arc<Mutex<Vec<u8>>>,
    lookup: Arc<Mutex<Lookup>>,
    next_attempt: Option<Instant>,
    clock: SharedClock,
    bus: MessageBus,
    subscriptions: Vec<SubscriptionId>,
}

impl RelayClient {
    /// Create a link that connects on its first iteration.
    pub fn new(bus: &MessageBus, settings: RelayClientSettings) -> Self {
        Self::with_clock(bus, settings, system_clock())
    }

    /// As [`new`](Self::new), timing reconnects with `clock`.
    pub fn with_clock(bus: &MessageBus, settings: RelayClientSettings, clock: SharedClock) -> Self {
        let RelayClientSettings {
            alias,
            target,
            reconnect,
            read_buffer_size,
        } = settings;
        let outbox = Arc::new(Mutex::new(Vec::new()));
        let lookup = Arc::new(Mutex::new(Lookup::Idle));
        let mut subscriptions = Vec::new();

        let queue = Arc::clone(&outbox);
        let queue_alias = alias.clone();
        subscriptions.push(bus.subscribe_filtered(
            Filter::protocol(PROTOCOL)
                .action("send")
                .field("alias", alias.as_str()),
            move |message| {
                let line = message
                    .get_str("line")
                    .ok_or_else(|| anyhow::anyhow!("relay/send without line"))?;
                queue_line(&mut queue.lock(), line, &queue_alias);
                Ok(())
            },
        ));

        if let RelayTarget::Host { host, .. } = &target {
            let answer = Arc::clone(&lookup);
            subscriptions.push(bus.subscribe_filtered(
                Filter::protocol(dns::PROTOCOL)
                    .action(dns::ACTION_RESOLVE_COMPLETE)
                    .field("host", host.as_str()),
                move |message| {
                    let mut state = answer.lock();
                    if *state == Lookup::Waiting {
                        let result = message.get_str("result").unwrap_or_default();
                        *state = Lookup::Answered(result.to_string());
                    }
                    Ok(())
                },
            ));
        }

        let handler = LinkHandler {
            alias: alias.clone(),
            bus: bus.clone(),
            lines: LineBuffer::new(),
            last_disconnect: None,
        };
        let next_attempt = Some(clock.now());
        Self {
            alias,
            target,
            reconnect,
            conn: Connection::with_buffer_size(handler, read_buffer_size),
            outbox,
            lookup,
            next_attempt,
            clock,
            bus: bus.clone(),
            subscriptions,
        }
    }

    /// Alias carried in published messages.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// State of the underlying connection.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Bytes waiting to be written.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.outbox.lock().len()
    }

    /// When the next connect attempt is due, if one is scheduled.
    #[must_use]
    pub const fn next_attempt(&self) -> Option<Instant> {
        self.next_attempt
    }

    /// Close the link without scheduling a reconnect.
    pub fn disconnect(&mut self) {
        self.next_attempt = None;
        self.conn.disconnect();
        self.after_disconnect();
    }

    /// Schedule an immediate connect attempt if the link is down.
    pub fn connect_now(&mut self) {
        if self.conn.state() == ConnectionState::Disconnected {
            self.next_attempt = Some(self.clock.now());
        }
    }

    fn try_connect(&mut self) {
        let addr = match self.target.clone() {
            RelayTarget::Addr(addr) => addr,
            RelayTarget::Host { host, port } => {
                let answer = {
                    let mut state = self.lookup.lock();
                    match &*state {
                        Lookup::Idle => {
                            *state = Lookup::Waiting;
                            None
                        }
                        Lookup::Waiting => return,
                        Lookup::Answered(result) => {
                            let result = result.clone();
                            *state = Lookup::Idle;
                            Some(result)
                        }
                    }
                };
                let Some(result) = answer else {
                    tracing::debug!(alias = %self.alias, host = %host, "resolving relay target");
                    self.bus.publish(&dns::resolve_request(host));
                    return;
                };
                let Ok(ip) = result.parse::<IpAddr>() else {
                    tracing::warn!(alias = %self.alias, host = %host, "relay target did not resolve");
                    self.bus.publish(
                        &relay_message("disconnected", &self.alias)
                            .with("reason", format!("resolve failed: {host}")),
                    );
                    self.schedule_reconnect();
                    return;
                };
                SocketAddr::new(ip, port)
            }
        };
        self.next_attempt = None;
        if let Err(err) = self.conn.connect(addr) {
            tracing::debug!(alias = %self.alias, error = %err, "connect skipped");
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect.is_zero() {
            self.next_attempt = None;
            return;
        }
        tracing::info!(
            alias = %self.alias,
            delay_ms = self.reconnect.as_millis(),
            "reconnect scheduled"
        );
        self.next_attempt = Some(self.clock.now() + self.reconnect);
    }

    fn after_disconnect(&mut self) {
        if let Some(reason) = self.conn.handler_mut().last_disconnect.take() {
            self.outbox.lock().clear();
            if reason != DisconnectReason::LocalRequest {
                self.schedule_reconnect();
            }
        }
    }

    fn flush(&mut self) {
        // Taken out of the lock: a failed send publishes, and subscribers may queue.
        let pending = std::mem::take(&mut *self.outbox.lock());
        if pending.is_empty() {
            return;
        }
        let written = self.conn.send(&pending).unwrap_or(0);
        if self.conn.state() == ConnectionState::Connected && written < pending.len() {
            let mut outbox = self.outbox.lock();
            let mut rest = pending[written..].to_vec();
            rest.append(&mut outbox);
            *outbox = rest;
        }
    }
}

impl Module for RelayClient {
    fn iterate(&mut self) -> Result<(), ModuleError> {
        if self.conn.state() == ConnectionState::Disconnected {
            if let Some(due) = self.next_attempt {
                if self.clock.now() >= due {
                    self.try_connect();
                }
            }
        }
        self.conn.poll();
        self.after_disconnect();
        if self.conn.state() == ConnectionState::Connected {
            self.flush();
            self.after_disconnect();
        }
        Ok(())
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            let _ = self.bus.unsubscribe(id);
        }
    }
}

// ============================================================================
// Server
// ============================================================================

struct DownstreamHandler {
    alias: String,
    bus: MessageBus,
    lines: BTreeMap<ClientId, LineBuffer>,
    departed: Vec<ClientId>,
}

impl ListenerHandler for DownstreamHandler {
    fn on_client_connect(&mut self, id: ClientId, peer: SocketAddr) {
        self.lines.insert(id, LineBuffer::new());
        self.bus.publish(
            &relay_message("client-connected", &self.alias)
                .with("client", id)
                .with("peer", peer.to_string()),
        );
    }

    fn on_client_disconnect(&mut self, id: ClientId, reason: DisconnectReason) {
        self.lines.remove(&id);
        self.departed.push(id);
        self.bus.publish(
            &relay_message("client-disconnected", &self.alias)
                .with("client", id)
                .with("reason", reason.to_string()),
        );
    }

    fn on_client_recv(&mut self, id: ClientId, data: &[u8]) {
        let Some(buffer) = self.lines.get_mut(&id) else {
            return;
        };
        for line in buffer.push(data) {
            self.bus.publish(
                &relay_message("client-line", &self.alias)
                    .with("client", id)
                    .with("line", line),
            );
        }
    }
}

enum Outgoing {
    To(ClientId, String),
    All(String),
}

/// Listening endpoint bridged onto the bus.
pub struct RelayServer {
    alias: String,
    listener: Listener<DownstreamHandler>,
    requests: Arc<Mutex<Vec<Outgoing>>>,
    pending: BTreeMap<ClientId, Vec<u8>>,
    bus: MessageBus,
    subscriptions: Vec<SubscriptionId>,
}

impl RelayServer {
    /// Bind `addr` and start accepting.
    ///
    /// # Errors
    ///
    /// `ListenError::BindFailed` or `ListenError::ListenFailed` from the listener.
    pub fn bind(
        bus: &MessageBus,
        alias: impl Into<String>,
        addr: SocketAddr,
        read_buffer_size: usize,
    ) -> Result<Self, ListenError> {
        let alias = alias.into();
        let handler = DownstreamHandler {
            alias: alias.clone(),
            bus: bus.clone(),
            lines: BTreeMap::new(),
            departed: Vec::new(),
        };
        let mut listener = Listener::with_buffer_size(handler, read_buffer_size);
        listener.listen(addr)?;

        let requests = Arc::new(Mutex::new(Vec::new()));
        let mut subscriptions = Vec::new();

        let queue = Arc::clone(&requests);
        subscriptions.push(bus.subscribe_filtered(
            Filter::protocol(PROTOCOL)
                .action("client-send")
                .field("alias", alias.as_str()),
            move |message| {
                let client = message
                    .get_u64("client")
                    .and_then(|c| ClientId::try_from(c).ok())
                    .ok_or_else(|| anyhow::anyhow!("relay/client-send without client"))?;
                let line = message
                    .get_str("line")
                    .ok_or_else(|| anyhow::anyhow!("relay/client-send without line"))?;
                queue.lock().push(Outgoing::To(client, line.to_string()));
                Ok(())
            },
        ));

        let queue = Arc::clone(&requests);
        subscriptions.push(bus.subscribe_filtered(
            Filter::protocol(PROTOCOL)
                .action("broadcast")
                .field("alias", alias.as_str()),
            move |message| {
                let line = message
                    .get_str("line")
                    .ok_or_else(|| anyhow::anyhow!("relay/broadcast without line"))?;
                queue.lock().push(Outgoing::All(line.to_string()));
                Ok(())
            },
        ));

        Ok(Self {
            alias,
            listener,
            requests,
            pending: BTreeMap::new(),
            bus: bus.clone(),
            subscriptions,
        })
    }

    /// Alias carried in published messages.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Bound address.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// Connected downstream clients, ascending.
    #[must_use]
    pub fn clients(&self) -> Vec<ClientId> {
        self.listener.client_ids()
    }

    /// Bytes waiting to be written to `client`.
    #[must_use]
    pub fn pending_bytes(&self, client: ClientId) -> usize {
        self.pending.get(&client).map_or(0, Vec::len)
    }

    /// Drop one downstream client.
    ///
    /// # Errors
    ///
    /// `ListenError::UnknownClient` if `client` is not connected.
    pub fn disconnect_client(&mut self, client: ClientId) -> Result<(), ListenError> {
        self.listener.disconnect_client(client)?;
        self.forget_departed();
        Ok(())
    }

    fn forget_departed(&mut self) {
        for id in self.listener.handler_mut().departed.drain(..) {
            self.pending.remove(&id);
        }
    }

    fn enqueue_requests(&mut self) {
        let requests = std::mem::take(&mut *self.requests.lock());
        for request in requests {
            match request {
                Outgoing::To(id, line) => {
                    if self.listener.client_peer(id).is_none() {
                        tracing::debug!(alias = %self.alias, client = id, "send to unknown client dropped");
                        continue;
                    }
                    queue_line(self.pending.entry(id).or_default(), &line, &self.alias);
                }
                Outgoing::All(line) => {
                    for id in self.listener.client_ids() {
                        queue_line(self.pending.entry(id).or_default(), &line, &self.alias);
                    }
                }
            }
        }
    }

    fn flush(&mut self) {
        let ids: Vec<ClientId> = self
            .pending
            .iter()
            .filter(|(_, buf)| !buf.is_empty())
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            let Some(buf) = self.pending.get(&id) else {
                continue;
            };
            let written = match self.listener.send(id, buf) {
                Ok(n) => n,
                Err(_) => {
                    self.pending.remove(&id);
                    continue;
                }
            };
            if let Some(buf) = self.pending.get_mut(&id) {
                buf.drain(..written);
            }
        }
        self.forget_departed();
    }
}

impl Module for RelayServer {
    fn iterate(&mut self) -> Result<(), ModuleError> {
        self.listener.poll();
        self.forget_departed();
        self.enqueue_requests();
        self.flush();
        Ok(())
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            let _ = self.bus.unsubscribe(id);
        }
    }
}
