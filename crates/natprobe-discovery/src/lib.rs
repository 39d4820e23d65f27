//! # natprobe Discovery
//!
//! NAT type discovery over classic STUN (RFC 3489).
//!
//! This crate provides:
//! - A blocking STUN transaction engine with bounded retransmission
//! - The RFC 3489 Section 10.1 decision tree as an explicit state machine
//! - Traversal hints derived from the detected NAT type
//!
//! The caller owns the UDP socket. Classification borrows it for the duration
//! of the tests and sends from it, so the reported public endpoint is the
//! mapping of that exact socket.
//!
//! ## Example
//!
//! ```rust,no_run
//! use natprobe_discovery::{DEFAULT_STUN_PORT, classify};
//! use std::net::UdpSocket;
//!
//! let socket = UdpSocket::bind("0.0.0.0:0").unwrap();
//! let result = classify("stun.example.org", DEFAULT_STUN_PORT, &socket).unwrap();
//!
//! println!("NAT type: {}", result.nat_type());
//! if let Some(endpoint) = result.public_endpoint() {
//!     println!("Public endpoint: {endpoint}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classifier;
pub mod clock;
pub mod error;
pub mod observer;
pub mod socket;
pub mod transaction;
pub mod types;

pub use classifier::{ClassificationRun, NatClassifier, Resolve, Step, SystemResolver, classify};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ClassifyError;
pub use observer::{TracingObserver, TransactionObserver, TransactionStats};
pub use socket::DatagramSocket;
pub use transaction::{
    DEFAULT_BUDGET, DEFAULT_POLL_INTERVAL, DEFAULT_RECV_BUFFER_SIZE, Transact, TransactionConfig,
    TransactionExecutor, TransactionOutcome,
};
pub use types::{ClassificationResult, NatType, TraversalStrategy};

pub use natprobe_stun::{DEFAULT_STUN_PORT, StunMessage};
