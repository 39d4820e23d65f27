//! Transaction observers.
//!
//! Transient failures never escape a transaction: send errors, receive
//! errors, malformed datagrams and stray responses only lengthen the retry
//! loop. Observers are where they become visible.

use natprobe_stun::{StunError, StunMessage};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Callbacks for events inside the retry loop
///
/// Every method defaults to a no-op.
pub trait TransactionObserver {
    /// A request datagram was handed to the socket
    fn on_sent(&self, _destination: SocketAddr, _attempt: u32) {}

    /// Sending failed; the loop keeps going
    fn on_send_failed(&self, _destination: SocketAddr, _error: &io::Error) {}

    /// Receiving failed; the loop keeps going
    fn on_receive_failed(&self, _error: &io::Error) {}

    /// A datagram could not be decoded
    fn on_malformed(&self, _error: &StunError) {}

    /// A well-formed message did not answer the pending request
    fn on_unmatched(&self, _message: &StunMessage) {}

    /// The budget ran out without a matching response
    fn on_exhausted(&self, _destination: SocketAddr, _attempts: u32) {}
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl TransactionObserver for TracingObserver {
    fn on_sent(&self, destination: SocketAddr, attempt: u32) {
        tracing::trace!(%destination, attempt, "sent binding request");
    }

    fn on_send_failed(&self, destination: SocketAddr, error: &io::Error) {
        tracing::debug!(%destination, %error, "send failed, retrying");
    }

    fn on_receive_failed(&self, error: &io::Error) {
        tracing::debug!(%error, "receive failed, retrying");
    }

    fn on_malformed(&self, error: &StunError) {
        tracing::debug!(%error, "discarding malformed datagram");
    }

    fn on_unmatched(&self, message: &StunMessage) {
        tracing::trace!(
            kind = %message.kind,
            transaction_id = %message.transaction_id,
            "discarding message for another transaction"
        );
    }

    fn on_exhausted(&self, destination: SocketAddr, attempts: u32) {
        tracing::debug!(%destination, attempts, "no response within budget");
    }
}

/// Counts events for callers that want numbers instead of logs
#[derive(Debug, Default)]
pub struct TransactionStats {
    sent: AtomicU64,
    send_failures: AtomicU64,
    receive_failures: AtomicU64,
    malformed: AtomicU64,
    unmatched: AtomicU64,
    exhausted: AtomicU64,
}

impl TransactionStats {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request datagrams sent
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Failed sends
    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    /// Failed receives
    pub fn receive_failures(&self) -> u64 {
        self.receive_failures.load(Ordering::Relaxed)
    }

    /// Undecodable datagrams
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Messages for other transactions
    pub fn unmatched(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
    }

    /// Transactions that ran out of budget
    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }
}

impl TransactionObserver for TransactionStats {
    fn on_sent(&self, _destination: SocketAddr, _attempt: u32) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn on_send_failed(&self, _destination: SocketAddr, _error: &io::Error) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn on_receive_failed(&self, _error: &io::Error) {
        self.receive_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn on_malformed(&self, _error: &StunError) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    fn on_unmatched(&self, _message: &StunMessage) {
        self.unmatched.fetch_add(1, Ordering::Relaxed);
    }

    fn on_exhausted(&self, _destination: SocketAddr, _attempts: u32) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }
}

impl<T: TransactionObserver + ?Sized> TransactionObserver for &T {
    fn on_sent(&self, destination: SocketAddr, attempt: u32) {
        (**self).on_sent(destination, attempt);
    }

    fn on_send_failed(&self, destination: SocketAddr, error: &io::Error) {
        (**self).on_send_failed(destination, error);
    }

    fn on_receive_failed(&self, error: &io::Error) {
        (**self).on_receive_failed(error);
    }

    fn on_malformed(&self, error: &StunError) {
        (**self).on_malformed(error);
    }

    fn on_unmatched(&self, message: &StunMessage) {
        (**self).on_unmatched(message);
    }

    fn on_exhausted(&self, destination: SocketAddr, attempts: u32) {
        (**self).on_exhausted(destination, attempts);
    }
}

impl<T: TransactionObserver + ?Sized> TransactionObserver for Arc<T> {
    fn on_sent(&self, destination: SocketAddr, attempt: u32) {
        (**self).on_sent(destination, attempt);
    }

    fn on_send_failed(&self, destination: SocketAddr, error: &io::Error) {
        (**self).on_send_failed(destination, error);
    }

    fn on_receive_failed(&self, error: &io::Error) {
        (**self).on_receive_failed(error);
    }

    fn on_malformed(&self, error: &StunError) {
        (**self).on_malformed(error);
    }

    fn on_unmatched(&self, message: &StunMessage) {
        (**self).on_unmatched(message);
    }

    fn on_exhausted(&self, destination: SocketAddr, attempts: u32) {
        (**self).on_exhausted(destination, attempts);
    }
}

/// Fan events out to two observers
impl<A: TransactionObserver, B: TransactionObserver> TransactionObserver for (A, B) {
    fn on_sent(&self, destination: SocketAddr, attempt: u32) {
        self.0.on_sent(destination, attempt);
        self.1.on_sent(destination, attempt);
    }

    fn on_send_failed(&self, destination: SocketAddr, error: &io::Error) {
        self.0.on_send_failed(destination, error);
        self.1.on_send_failed(destination, error);
    }

    fn on_receive_failed(&self, error: &io::Error) {
        self.0.on_receive_failed(error);
        self.1.on_receive_failed(error);
    }

    fn on_malformed(&self, error: &StunError) {
        self.0.on_malformed(error);
        self.1.on_malformed(error);
    }

    fn on_unmatched(&self, message: &StunMessage) {
        self.0.on_unmatched(message);
        self.1.on_unmatched(message);
    }

    fn on_exhausted(&self, destination: SocketAddr, attempts: u32) {
        self.0.on_exhausted(destination, attempts);
        self.1.on_exhausted(destination, attempts);
    }
}
