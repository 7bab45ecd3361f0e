//! Connection state machine tests over real loopback sockets.
//!
//! Covers the connect / receive / peer-close lifecycle, connect failures,
//! single-attempt sends, and a randomised check that lifecycle callbacks
//! are delivered exactly once per transition.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use prometheus_relay::core::ConnectionError;
use prometheus_relay::net::{Connection, ConnectionHandler, ConnectionState, DisconnectReason};

// ============================================================================
// Helpers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Connect,
    Disconnect(DisconnectReason),
    Send(usize),
    Recv(Vec<u8>),
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Event>>>);

impl Recorder {
    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.0.lock())
    }

    fn snapshot(&self) -> Vec<Event> {
        self.0.lock().clone()
    }
}

impl ConnectionHandler for Recorder {
    fn on_connect(&mut self) {
        self.0.lock().push(Event::Connect);
    }

    fn on_disconnect(&mut self, reason: DisconnectReason) {
        self.0.lock().push(Event::Disconnect(reason));
    }

    fn on_send(&mut self, written: &[u8]) {
        self.0.lock().push(Event::Send(written.len()));
    }

    fn on_recv(&mut self, data: &[u8]) {
        self.0.lock().push(Event::Recv(data.to_vec()));
    }
}

fn poll_until(conn: &mut Connection<Recorder>, mut done: impl FnMut(&Connection<Recorder>) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(conn) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        conn.poll();
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn loopback() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn received_bytes(events: &[Event]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Recv(data) => Some(data.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn connect_receive_then_peer_close() {
    let (listener, addr) = loopback();
    let log = Recorder::default();
    let mut conn = Connection::new(log.clone());

    conn.connect(addr).unwrap();
    assert_eq!(conn.state(), ConnectionState::Connecting);
    let (mut server, _) = listener.accept().unwrap();
    poll_until(&mut conn, |c| c.state() == ConnectionState::Connected);
    assert_eq!(log.snapshot(), vec![Event::Connect]);

    server.write_all(b"hello").unwrap();
    poll_until(&mut conn, |_| received_bytes(&log.snapshot()).len() == 5);

    drop(server);
    poll_until(&mut conn, |c| c.state() == ConnectionState::Disconnected);

    let events = log.take();
    assert_eq!(events.first(), Some(&Event::Connect));
    assert_eq!(received_bytes(&events), b"hello");
    assert_eq!(
        events.last(),
        Some(&Event::Disconnect(DisconnectReason::PeerClosed))
    );
    let disconnects = events
        .iter()
        .filter(|e| matches!(e, Event::Disconnect(_)))
        .count();
    assert_eq!(disconnects, 1);
}

#[test]
fn refused_connect_reports_connect_failed_once() {
    let (listener, addr) = loopback();
    drop(listener);

    let log = Recorder::default();
    let mut conn = Connection::new(log.clone());
    conn.connect(addr).unwrap();
    poll_until(&mut conn, |c| c.state() == ConnectionState::Disconnected);
    conn.poll();

    let events = log.take();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Event::Disconnect(DisconnectReason::ConnectFailed(_))
    ));
}

#[test]
fn send_reports_written_prefix_and_reaches_peer() {
    let (listener, addr) = loopback();
    let log = Recorder::default();
    let mut conn = Connection::new(log.clone());
    conn.connect(addr).unwrap();
    let (mut server, _) = listener.accept().unwrap();
    poll_until(&mut conn, |c| c.state() == ConnectionState::Connected);

    let written = conn.send(b"NICK relay\r\n").unwrap();
    assert_eq!(written, 12);
    assert_eq!(log.snapshot().last(), Some(&Event::Send(12)));

    let mut buf = [0u8; 12];
    server.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"NICK relay\r\n");
}

#[test]
fn short_write_reports_prefix_and_stream_arrives_in_order() {
    let (listener, addr) = loopback();
    let log = Recorder::default();
    let mut conn = Connection::new(log.clone());
    conn.connect(addr).unwrap();
    let (mut server, _) = listener.accept().unwrap();
    poll_until(&mut conn, |c| c.state() == ConnectionState::Connected);
    log.take();

    // Larger than the loopback send buffer plus the unread peer's window.
    let payload: Vec<u8> = (0..32 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let first = conn.send(&payload).unwrap();
    assert!(first < payload.len(), "single write accepted {first} bytes");
    assert_eq!(log.take(), vec![Event::Send(first)]);

    let len = payload.len();
    let reader = std::thread::spawn(move || {
        server
            .set_read_timeout(Some(Duration::from_secs(20)))
            .unwrap();
        let mut got = vec![0; len];
        server.read_exact(&mut got).unwrap();
        got
    });

    let deadline = Instant::now() + Duration::from_secs(20);
    let mut offset = first;
    while offset < payload.len() {
        assert!(Instant::now() < deadline, "remainder never drained");
        offset += conn.send(&payload[offset..]).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(reader.join().unwrap(), payload);
}

#[test]
fn reconnect_after_local_disconnect() {
    let (listener, addr) = loopback();
    let log = Recorder::default();
    let mut conn = Connection::new(log.clone());

    for _ in 0..2 {
        conn.connect(addr).unwrap();
        let _server = listener.accept().unwrap();
        poll_until(&mut conn, |c| c.state() == ConnectionState::Connected);
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    assert_eq!(
        log.take(),
        vec![
            Event::Connect,
            Event::Disconnect(DisconnectReason::LocalRequest),
            Event::Connect,
            Event::Disconnect(DisconnectReason::LocalRequest),
        ]
    );
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn send_while_not_connected_never_calls_on_send() {
    let (_listener, addr) = loopback();
    let log = Recorder::default();
    let mut conn = Connection::new(log.clone());
    assert_eq!(conn.send(b"x"), Err(ConnectionError::NotConnected));
    conn.connect(addr).unwrap();
    assert_eq!(conn.send(b"x"), Err(ConnectionError::NotConnected));
    assert!(log.snapshot().iter().all(|e| !matches!(e, Event::Send(_))));
}

#[test]
fn random_operation_sequences_keep_callbacks_paired() {
    let (_listener, addr) = loopback();
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);

    for _round in 0..5 {
        let log = Recorder::default();
        let mut conn = Connection::new(log.clone());
        // An attempt is open from a successful `connect` until its one disconnect.
        let mut attempt_open = false;
        let mut connected = false;

        for _ in 0..60 {
            let before = conn.state();
            match rng.random_range(0..3) {
                0 => {
                    let result = conn.connect(addr);
                    if before == ConnectionState::Disconnected {
                        assert!(result.is_ok());
                        attempt_open = true;
                    } else {
                        assert_eq!(result, Err(ConnectionError::AlreadyConnected));
                        assert_eq!(conn.state(), before);
                    }
                }
                1 => conn.disconnect(),
                _ => {
                    conn.poll();
                    std::thread::sleep(Duration::from_millis(1));
                }
            }

            for event in log.take() {
                match event {
                    Event::Connect => {
                        assert!(attempt_open, "on_connect without a connect attempt");
                        assert!(!connected, "two on_connect in a row");
                        connected = true;
                    }
                    Event::Disconnect(_) => {
                        assert!(attempt_open, "on_disconnect without an open attempt");
                        attempt_open = false;
                        connected = false;
                    }
                    Event::Send(_) | Event::Recv(_) => {}
                }
            }
            assert_eq!(conn.state() == ConnectionState::Connected, connected);
        }
        conn.disconnect();
    }
}
