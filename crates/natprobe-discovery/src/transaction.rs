//! STUN transaction engine.
//!
//! One transaction sends a request and waits for the response carrying the
//! same transaction id, retransmitting once per poll interval until the total
//! budget runs out:
//!
//! ```text
//!   send ──► wait ≤ poll ──► datagram? ──► decode ──► same id? ──► Response
//!    ▲                          │ no          │ err        │ no
//!    └──────── budget left ◄────┴─────────────┴────────────┘
//!                  │ no
//!                  ▼
//!             NoResponse
//! ```
//!
//! Stray datagrams inside a poll window are consumed without triggering an
//! early retransmission, so the request goes out at most once per window.

use crate::clock::{Clock, SystemClock};
use crate::observer::{TracingObserver, TransactionObserver};
use crate::socket::DatagramSocket;
use natprobe_stun::{HEADER_SIZE, StunMessage};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Default total time spent on one transaction
pub const DEFAULT_BUDGET: Duration = Duration::from_millis(2000);

/// Default wait for a response before retransmitting
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default receive buffer size
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 512;

/// Per-transaction timing and buffer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Total wall-clock budget, measured from the first send
    pub budget: Duration,
    /// Wait for a response before retransmitting
    pub poll_interval: Duration,
    /// Receive buffer size; longer datagrams are truncated
    pub recv_buffer_size: usize,
}

impl TransactionConfig {
    /// Set the total budget
    #[must_use]
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Set the retransmission interval
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the receive buffer size (at least one STUN header)
    #[must_use]
    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size.max(HEADER_SIZE);
        self
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_BUDGET,
            poll_interval: DEFAULT_POLL_INTERVAL,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}

/// Result of one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// A response with the request's transaction id
    Response(StunMessage),
    /// Budget exhausted, or no destination to send to
    NoResponse,
}

impl TransactionOutcome {
    /// The response, if one arrived
    #[must_use]
    pub fn response(&self) -> Option<&StunMessage> {
        match self {
            Self::Response(message) => Some(message),
            Self::NoResponse => None,
        }
    }

    /// Take the response, if one arrived
    #[must_use]
    pub fn into_response(self) -> Option<StunMessage> {
        match self {
            Self::Response(message) => Some(message),
            Self::NoResponse => None,
        }
    }

    /// Whether a response arrived
    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }
}

/// Request/response exchange used by the classifier
///
/// Implemented by [`TransactionExecutor`]; tests substitute scripted stubs.
pub trait Transact {
    /// Run one transaction; `None` destination yields `NoResponse` without I/O
    fn transact(
        &mut self,
        request: &StunMessage,
        destination: Option<SocketAddr>,
    ) -> TransactionOutcome;

    /// Local address of the underlying socket
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be determined
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Executes transactions over a borrowed socket
pub struct TransactionExecutor<'s, S: ?Sized, C = SystemClock, O = TracingObserver> {
    socket: &'s S,
    config: TransactionConfig,
    clock: C,
    observer: O,
}

impl<'s, S: DatagramSocket + ?Sized> TransactionExecutor<'s, S> {
    /// Create an executor using the wall clock and logging observer
    #[must_use]
    pub fn new(socket: &'s S, config: TransactionConfig) -> Self {
        Self {
            socket,
            config,
            clock: SystemClock,
            observer: TracingObserver,
        }
    }
}

impl<'s, S: ?Sized, C, O> TransactionExecutor<'s, S, C, O> {
    /// Replace the time source
    #[must_use]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> TransactionExecutor<'s, S, C2, O> {
        TransactionExecutor {
            socket: self.socket,
            config: self.config,
            clock,
            observer: self.observer,
        }
    }

    /// Replace the observer
    #[must_use]
    pub fn with_observer<O2: TransactionObserver>(
        self,
        observer: O2,
    ) -> TransactionExecutor<'s, S, C, O2> {
        TransactionExecutor {
            socket: self.socket,
            config: self.config,
            clock: self.clock,
            observer,
        }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }
}

impl<S, C, O> TransactionExecutor<'_, S, C, O>
where
    S: DatagramSocket + ?Sized,
    C: Clock,
    O: TransactionObserver,
{
    /// Run one transaction
    ///
    /// Returns `NoResponse` immediately when `destination` is `None`.
    /// Otherwise the request is sent and re-sent until a response with the
    /// same transaction id arrives or the budget elapses. Send errors,
    /// receive errors, malformed datagrams and responses to other
    /// transactions are reported to the observer and otherwise ignored.
    pub fn execute(
        &self,
        request: &StunMessage,
        destination: Option<SocketAddr>,
    ) -> TransactionOutcome {
        let Some(destination) = destination else {
            tracing::trace!(
                transaction_id = %request.transaction_id,
                "no destination, skipping transaction"
            );
            return TransactionOutcome::NoResponse;
        };

        let request_bytes = request.encode();
        let mut buf = vec![0u8; self.config.recv_buffer_size.max(HEADER_SIZE)];
        let deadline = self.clock.now() + self.config.budget;
        let mut attempts = 0u32;

        while self.clock.now() < deadline {
            attempts += 1;
            match self.socket.send_to(&request_bytes, destination) {
                Ok(_) => self.observer.on_sent(destination, attempts),
                Err(e) => self.observer.on_send_failed(destination, &e),
            }

            let window_end = (self.clock.now() + self.config.poll_interval).min(deadline);
            if let Some(response) = self.await_response(request, &mut buf, window_end) {
                return TransactionOutcome::Response(response);
            }
        }

        self.observer.on_exhausted(destination, attempts);
        TransactionOutcome::NoResponse
    }

    /// Receive until a matching response arrives or `window_end` passes
    fn await_response(
        &self,
        request: &StunMessage,
        buf: &mut [u8],
        window_end: Instant,
    ) -> Option<StunMessage> {
        loop {
            let remaining = window_end.saturating_duration_since(self.clock.now());
            if remaining.is_zero() {
                return None;
            }

            match self.socket.recv_timeout(buf, remaining) {
                Ok(Some(len)) => match StunMessage::decode(&buf[..len]) {
                    Ok(message) if is_response_to(&message, request) => return Some(message),
                    Ok(message) => self.observer.on_unmatched(&message),
                    Err(e) => self.observer.on_malformed(&e),
                },
                Ok(None) => return None,
                Err(e) => {
                    // Errors such as ICMP port unreachable come back at once;
                    // sit out the window instead of spinning on them.
                    self.observer.on_receive_failed(&e);
                    self.clock.sleep(remaining);
                    return None;
                }
            }
        }
    }
}

impl<S, C, O> Transact for TransactionExecutor<'_, S, C, O>
where
    S: DatagramSocket + ?Sized,
    C: Clock,
    O: TransactionObserver,
{
    fn transact(
        &mut self,
        request: &StunMessage,
        destination: Option<SocketAddr>,
    ) -> TransactionOutcome {
        self.execute(request, destination)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

fn is_response_to(message: &StunMessage, request: &StunMessage) -> bool {
    message.transaction_id == request.transaction_id && message.kind.is_response()
}
