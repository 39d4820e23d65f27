//! Transactions and classification over real loopback sockets

use natprobe_discovery::socket::bind_udp_socket;
use natprobe_discovery::{
    ClassifyError, NatClassifier, NatType, TransactionConfig, TransactionExecutor,
    TransactionStats,
};
use natprobe_stun::{MessageKind, StunAttribute, StunMessage};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn fast_config() -> TransactionConfig {
    TransactionConfig::default()
        .with_budget(Duration::from_millis(300))
        .with_poll_interval(Duration::from_millis(50))
}

/// Single-socket responder that reports the true source address
///
/// Ignores CHANGE-REQUEST, so from the client's point of view every test is
/// answered.
struct Reflector {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reflector {
    fn start(skip_first: usize) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let flag = stop.clone();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 512];
            let mut skipped = 0;
            while !flag.load(Ordering::Relaxed) {
                let Ok((len, from)) = socket.recv_from(&mut buf) else {
                    continue;
                };
                let Ok(request) = StunMessage::decode(&buf[..len]) else {
                    continue;
                };
                if skipped < skip_first {
                    skipped += 1;
                    continue;
                }
                let response = StunMessage::response_to(&request, MessageKind::BindingResponse)
                    .with_attribute(StunAttribute::MappedAddress(from))
                    .with_attribute(StunAttribute::ChangedAddress(addr));
                let _ = socket.send_to(&response.encode(), from);
            }
        });

        Self {
            addr,
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Reflector {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn client() -> UdpSocket {
    bind_udp_socket("127.0.0.1:0".parse().unwrap()).unwrap()
}

#[test]
fn test_executor_receives_matching_response() {
    let server = Reflector::start(0);
    let socket = client();
    let executor = TransactionExecutor::new(&socket, fast_config());

    let request = StunMessage::binding_request();
    let outcome = executor.execute(&request, Some(server.addr));

    let response = outcome.into_response().expect("reflector should answer");
    assert_eq!(response.transaction_id, request.transaction_id);
    assert_eq!(response.mapped_address(), Some(socket.local_addr().unwrap()));
}

#[test]
fn test_executor_retransmits_after_lost_request() {
    let server = Reflector::start(2);
    let socket = client();
    let stats = TransactionStats::new();
    let executor = TransactionExecutor::new(&socket, fast_config()).with_observer(&stats);

    let outcome = executor.execute(&StunMessage::binding_request(), Some(server.addr));

    assert!(outcome.is_response());
    assert!(stats.sent() >= 3);
    assert_eq!(stats.exhausted(), 0);
}

#[test]
fn test_executor_gives_up_within_budget() {
    // Bound but never read: requests vanish
    let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
    let socket = client();
    let config = fast_config();
    let executor = TransactionExecutor::new(&socket, config);

    let started = Instant::now();
    let outcome = executor.execute(
        &StunMessage::binding_request(),
        Some(sink.local_addr().unwrap()),
    );
    let elapsed = started.elapsed();

    assert!(!outcome.is_response());
    assert!(elapsed >= config.budget);
    assert!(elapsed < config.budget + Duration::from_millis(250));
}

#[test]
fn test_classify_open_internet_on_loopback() {
    let server = Reflector::start(0);
    let socket = client();
    let classifier = NatClassifier::new().with_config(fast_config());

    let result = classifier
        .classify("127.0.0.1", server.addr.port(), &socket)
        .unwrap();

    assert_eq!(result.nat_type(), NatType::OpenInternet);
    assert_eq!(result.public_endpoint(), Some(socket.local_addr().unwrap()));
}

#[test]
fn test_classify_blocked_on_loopback() {
    let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
    let socket = client();
    let classifier = NatClassifier::new().with_config(fast_config());

    let result = classifier
        .classify("127.0.0.1", sink.local_addr().unwrap().port(), &socket)
        .unwrap();

    assert_eq!(result.nat_type(), NatType::UdpBlocked);
    assert_eq!(result.public_endpoint(), None);
}

#[test]
fn test_classify_reuses_socket() {
    let server = Reflector::start(0);
    let socket = client();
    let classifier = NatClassifier::new().with_config(fast_config());

    let first = classifier
        .classify("127.0.0.1", server.addr.port(), &socket)
        .unwrap();
    let second = classifier
        .classify("127.0.0.1", server.addr.port(), &socket)
        .unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_classify_localhost_name() {
    let server = Reflector::start(0);
    let socket = client();
    let classifier = NatClassifier::new().with_config(fast_config());

    let result = classifier.classify("localhost", server.addr.port(), &socket);

    // Some hosts resolve localhost to ::1 only; the v4 socket falls back to it
    // and sees nothing, which is still a classification rather than an error.
    match result {
        Ok(result) => assert!(matches!(
            result.nat_type(),
            NatType::OpenInternet | NatType::UdpBlocked
        )),
        Err(ClassifyError::HostResolution { .. }) => {}
        Err(e) => panic!("unexpected error: {e}"),
    }
}
