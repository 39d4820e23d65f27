//! # natprobe STUN
//!
//! Message codec for classic STUN as defined in RFC 3489.
//!
//! This crate provides:
//! - Binding and Shared Secret message kinds
//! - 128-bit transaction identifiers
//! - The RFC 3489 attribute set (MAPPED-ADDRESS, CHANGE-REQUEST,
//!   CHANGED-ADDRESS, ERROR-CODE, ...) plus the XOR-MAPPED-ADDRESS and
//!   OTHER-ADDRESS attributes that newer servers answer with
//!
//! ## Example
//!
//! ```rust
//! use natprobe_stun::{ChangeRequest, StunMessage};
//!
//! let request = StunMessage::binding_request().with_change_request(ChangeRequest::BOTH);
//! let bytes = request.encode();
//!
//! let decoded = StunMessage::decode(&bytes).unwrap();
//! assert_eq!(decoded.transaction_id, request.transaction_id);
//! assert_eq!(decoded.change_request(), Some(ChangeRequest::BOTH));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute;
pub mod error;
pub mod message;

pub use attribute::{ChangeRequest, ErrorCode, StunAttribute};
pub use error::StunError;
pub use message::{
    DEFAULT_STUN_PORT, HEADER_SIZE, MessageKind, StunMessage, TRANSACTION_ID_SIZE, TransactionId,
};
