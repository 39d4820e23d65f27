//! Loopback STUN server for classification tests
//!
//! Binds four sockets on 127.0.0.1 that stand in for the two addresses and
//! two ports of an RFC 3489 server:
//!
//! | index | role                            |
//! |-------|---------------------------------|
//! | 0     | primary address, primary port   |
//! | 1     | primary address, alternate port |
//! | 2     | alternate address, primary port |
//! | 3     | alternate address, alternate port |
//!
//! Bit 1 of the index is "address", bit 0 is "port", so a CHANGE-REQUEST is
//! answered from `received_on ^ flags`. CHANGED-ADDRESS always names socket 3.
//!
//! A [`NatBehavior`] decides which change requests get answered and what
//! mapped address is reported, which is enough to make a loopback client look
//! like it sits behind any RFC 3489 NAT type.
//!
//! # Example
//!
//! ```no_run
//! use natprobe_discovery::{NatClassifier, NatType};
//! use natprobe_integration_tests::fixtures::{NatBehavior, StubStunServer};
//! use std::net::UdpSocket;
//!
//! let server = StubStunServer::start(NatBehavior::full_cone("203.0.113.7:40000".parse().unwrap()));
//! let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
//!
//! let result = NatClassifier::new()
//!     .classify("127.0.0.1", server.primary().port(), &socket)
//!     .unwrap();
//! assert_eq!(result.nat_type(), NatType::FullCone);
//! ```

use natprobe_stun::{ErrorCode, MessageKind, StunAttribute, StunMessage};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const CHANGE_ADDRESS_BIT: usize = 0b10;
const CHANGE_PORT_BIT: usize = 0b01;

/// How the simulated NAT treats the client's traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatBehavior {
    /// Mapped address reported by the primary address; `None` reports the
    /// true source
    pub mapped: Option<SocketAddr>,
    /// Mapped address reported by the alternate address; `None` reuses
    /// `mapped`
    pub alternate_mapped: Option<SocketAddr>,
    /// Let responses from a different address through
    pub allow_change_address: bool,
    /// Let responses from a different port through
    pub allow_change_port: bool,
    /// Whether the alternate address answers at all
    pub alternate_reachable: bool,
    /// Include CHANGED-ADDRESS in responses
    pub report_changed_address: bool,
    /// Answer every request with this ERROR-CODE instead
    pub error_code: Option<u16>,
    /// Drop this many requests before answering any
    pub drop_first: u64,
}

impl NatBehavior {
    /// No NAT, no filtering
    #[must_use]
    pub fn open() -> Self {
        Self {
            mapped: None,
            alternate_mapped: None,
            allow_change_address: true,
            allow_change_port: true,
            alternate_reachable: true,
            report_changed_address: true,
            error_code: None,
            drop_first: 0,
        }
    }

    /// No NAT, unsolicited inbound dropped
    #[must_use]
    pub fn firewall() -> Self {
        Self {
            allow_change_address: false,
            allow_change_port: false,
            ..Self::open()
        }
    }

    /// Endpoint-independent mapping and filtering
    #[must_use]
    pub fn full_cone(mapped: SocketAddr) -> Self {
        Self {
            mapped: Some(mapped),
            ..Self::open()
        }
    }

    /// Address-dependent filtering
    #[must_use]
    pub fn restricted_cone(mapped: SocketAddr) -> Self {
        Self {
            allow_change_address: false,
            ..Self::full_cone(mapped)
        }
    }

    /// Address-and-port-dependent filtering
    #[must_use]
    pub fn port_restricted_cone(mapped: SocketAddr) -> Self {
        Self {
            allow_change_address: false,
            allow_change_port: false,
            ..Self::full_cone(mapped)
        }
    }

    /// Destination-dependent mapping
    #[must_use]
    pub fn symmetric(mapped: SocketAddr, alternate_mapped: SocketAddr) -> Self {
        Self {
            alternate_mapped: Some(alternate_mapped),
            ..Self::port_restricted_cone(mapped)
        }
    }

    /// Whether a response from `reply_on` may reach a client that sent to
    /// `received_on`
    fn passes(&self, received_on: usize, reply_on: usize) -> bool {
        let changed = received_on ^ reply_on;
        if changed & CHANGE_ADDRESS_BIT != 0 && !self.allow_change_address {
            return false;
        }
        if changed & CHANGE_PORT_BIT != 0 && !self.allow_change_port {
            return false;
        }
        true
    }
}

/// Four-socket loopback STUN server
pub struct StubStunServer {
    addrs: [SocketAddr; 4],
    requests: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StubStunServer {
    /// Bind and start serving
    ///
    /// # Panics
    ///
    /// Panics if the loopback sockets cannot be bound.
    #[must_use]
    pub fn start(behavior: NatBehavior) -> Self {
        let sockets: Vec<UdpSocket> = (0..4)
            .map(|_| {
                let socket = UdpSocket::bind("127.0.0.1:0").expect("bind stub socket");
                socket
                    .set_read_timeout(Some(Duration::from_millis(5)))
                    .expect("set read timeout");
                socket
            })
            .collect();
        let addrs = [0, 1, 2, 3].map(|i| sockets[i].local_addr().expect("local addr"));

        let requests = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let requests = requests.clone();
            let stop = stop.clone();
            thread::spawn(move || serve(&sockets, addrs, &behavior, &requests, &stop))
        };

        Self {
            addrs,
            requests,
            stop,
            handle: Some(handle),
        }
    }

    /// Primary address and port
    #[must_use]
    pub fn primary(&self) -> SocketAddr {
        self.addrs[0]
    }

    /// Address reported as CHANGED-ADDRESS
    #[must_use]
    pub fn changed(&self) -> SocketAddr {
        self.addrs[3]
    }

    /// Requests decoded so far, dropped ones included
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for StubStunServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(
    sockets: &[UdpSocket],
    addrs: [SocketAddr; 4],
    behavior: &NatBehavior,
    requests: &AtomicU64,
    stop: &AtomicBool,
) {
    let mut buf = [0u8; 1024];
    while !stop.load(Ordering::SeqCst) {
        for (received_on, socket) in sockets.iter().enumerate() {
            let Ok((len, from)) = socket.recv_from(&mut buf) else {
                continue;
            };
            let Ok(request) = StunMessage::decode(&buf[..len]) else {
                continue;
            };
            if request.kind != MessageKind::BindingRequest {
                continue;
            }

            let seen = requests.fetch_add(1, Ordering::SeqCst);
            if seen < behavior.drop_first {
                continue;
            }
            if received_on & CHANGE_ADDRESS_BIT != 0 && !behavior.alternate_reachable {
                continue;
            }

            let change = request.change_request().unwrap_or_default();
            let mut reply_on = received_on;
            if change.change_ip {
                reply_on ^= CHANGE_ADDRESS_BIT;
            }
            if change.change_port {
                reply_on ^= CHANGE_PORT_BIT;
            }
            if !behavior.passes(received_on, reply_on) {
                continue;
            }

            let response = respond(&request, received_on, reply_on, from, addrs, behavior);
            let _ = sockets[reply_on].send_to(&response.encode(), from);
        }
    }
}

fn respond(
    request: &StunMessage,
    received_on: usize,
    reply_on: usize,
    from: SocketAddr,
    addrs: [SocketAddr; 4],
    behavior: &NatBehavior,
) -> StunMessage {
    if let Some(code) = behavior.error_code {
        let mut response = StunMessage::response_to(request, MessageKind::BindingErrorResponse);
        if let Ok(error) = ErrorCode::new(code, "Stub Error") {
            response.add_attribute(StunAttribute::ErrorCode(error));
        }
        return response;
    }

    let mapped = if received_on & CHANGE_ADDRESS_BIT != 0 {
        behavior.alternate_mapped.or(behavior.mapped)
    } else {
        behavior.mapped
    }
    .unwrap_or(from);

    let mut response = StunMessage::response_to(request, MessageKind::BindingResponse)
        .with_attribute(StunAttribute::MappedAddress(mapped))
        .with_attribute(StunAttribute::SourceAddress(addrs[reply_on]));
    if behavior.report_changed_address {
        response.add_attribute(StunAttribute::ChangedAddress(addrs[3]));
    }
    response
}
