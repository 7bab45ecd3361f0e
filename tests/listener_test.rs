//! Listener multiplexing tests: accept, per-client reads, disconnects,
//! targeted sends and broadcast over loopback sockets.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use prometheus_relay::core::ListenError;
use prometheus_relay::net::{ClientId, DisconnectReason, Listener, ListenerHandler};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Connect(ClientId),
    Recv(ClientId, Vec<u8>),
    Disconnect(ClientId, DisconnectReason),
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Event>>>);

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }
}

impl ListenerHandler for Recorder {
    fn on_client_connect(&mut self, id: ClientId, _peer: SocketAddr) {
        self.0.lock().push(Event::Connect(id));
    }

    fn on_client_disconnect(&mut self, id: ClientId, reason: DisconnectReason) {
        self.0.lock().push(Event::Disconnect(id, reason));
    }

    fn on_client_recv(&mut self, id: ClientId, data: &[u8]) {
        self.0.lock().push(Event::Recv(id, data.to_vec()));
    }
}

fn listening() -> (Listener<Recorder>, Recorder, SocketAddr) {
    let log = Recorder::default();
    let mut listener = Listener::new(log.clone());
    let addr = listener.listen("127.0.0.1:0".parse().unwrap()).unwrap();
    (listener, log, addr)
}

fn poll_until(listener: &mut Listener<Recorder>, mut done: impl FnMut(&Listener<Recorder>) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(listener) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        listener.poll();
        std::thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn accept_receive_close_across_three_ticks() {
    let (mut listener, log, addr) = listening();

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"hello").unwrap();
    client.shutdown(Shutdown::Write).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    listener.poll();
    assert_eq!(log.events(), vec![Event::Connect(1)]);

    listener.poll();
    assert_eq!(
        log.events(),
        vec![Event::Connect(1), Event::Recv(1, b"hello".to_vec())]
    );

    listener.poll();
    assert_eq!(
        log.events(),
        vec![
            Event::Connect(1),
            Event::Recv(1, b"hello".to_vec()),
            Event::Disconnect(1, DisconnectReason::PeerClosed),
        ]
    );
    assert_eq!(listener.client_count(), 0);
}

#[test]
fn one_accept_per_poll() {
    let (mut listener, log, addr) = listening();
    let _a = TcpStream::connect(addr).unwrap();
    let _b = TcpStream::connect(addr).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    listener.poll();
    assert_eq!(listener.client_count(), 1);
    listener.poll();
    assert_eq!(listener.client_count(), 2);
    assert_eq!(log.events(), vec![Event::Connect(1), Event::Connect(2)]);
}

#[test]
fn identifiers_are_never_reused() {
    let (mut listener, log, addr) = listening();

    let first = TcpStream::connect(addr).unwrap();
    poll_until(&mut listener, |l| l.client_count() == 1);
    drop(first);
    poll_until(&mut listener, |l| l.client_count() == 0);

    let _second = TcpStream::connect(addr).unwrap();
    poll_until(&mut listener, |l| l.client_count() == 1);

    assert_eq!(listener.client_ids(), vec![2]);
    assert_eq!(
        log.events(),
        vec![
            Event::Connect(1),
            Event::Disconnect(1, DisconnectReason::PeerClosed),
            Event::Connect(2),
        ]
    );
}

// ============================================================================
// Sending
// ============================================================================

#[test]
fn send_and_broadcast_reach_clients() {
    let (mut listener, _log, addr) = listening();
    let mut a = TcpStream::connect(addr).unwrap();
    let mut b = TcpStream::connect(addr).unwrap();
    poll_until(&mut listener, |l| l.client_count() == 2);

    assert_eq!(listener.send(1, b"one\r\n").unwrap(), 5);
    let sent = listener.broadcast(b"all\r\n");
    assert_eq!(sent, vec![(1, 5), (2, 5)]);

    let mut buf = [0u8; 10];
    a.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"one\r\nall\r\n");
    let mut buf = [0u8; 5];
    b.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"all\r\n");
}

#[test]
fn local_disconnect_fires_once_and_forgets_client() {
    let (mut listener, log, addr) = listening();
    let _client = TcpStream::connect(addr).unwrap();
    poll_until(&mut listener, |l| l.client_count() == 1);

    listener.disconnect_client(1).unwrap();
    assert!(matches!(
        listener.disconnect_client(1),
        Err(ListenError::UnknownClient(1))
    ));
    assert!(matches!(listener.send(1, b"x"), Err(ListenError::UnknownClient(1))));
    assert_eq!(
        log.events().last(),
        Some(&Event::Disconnect(1, DisconnectReason::LocalRequest))
    );
}

#[test]
fn close_drops_everyone() {
    let (mut listener, log, addr) = listening();
    let _a = TcpStream::connect(addr).unwrap();
    let _b = TcpStream::connect(addr).unwrap();
    poll_until(&mut listener, |l| l.client_count() == 2);

    listener.close();
    assert!(!listener.is_listening());
    let disconnects = log
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Disconnect(_, DisconnectReason::LocalRequest)))
        .count();
    assert_eq!(disconnects, 2);
    assert!(TcpStream::connect(addr).is_err());
}
