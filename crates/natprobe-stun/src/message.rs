//! STUN messages (RFC 3489 Section 11.1)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      STUN Message Type        |         Message Length        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |
//! |                    Transaction ID (128 bits)
//! |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::attribute::{ChangeRequest, ErrorCode, MAX_VALUE_LEN, StunAttribute, padded_len};
use crate::error::StunError;
use rand::RngCore;
use std::fmt;
use std::net::SocketAddr;

/// STUN message header size (20 bytes)
pub const HEADER_SIZE: usize = 20;

/// Transaction identifier size (128 bits)
pub const TRANSACTION_ID_SIZE: usize = 16;

/// Well-known STUN server port
pub const DEFAULT_STUN_PORT: u16 = 3478;

/// 128-bit transaction identifier correlating a request with its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; TRANSACTION_ID_SIZE]);

impl TransactionId {
    /// Generate a random transaction id
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; TRANSACTION_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; TRANSACTION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; TRANSACTION_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// STUN message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Binding Request (0x0001)
    BindingRequest,
    /// Binding Response (0x0101)
    BindingResponse,
    /// Binding Error Response (0x0111)
    BindingErrorResponse,
    /// Shared Secret Request (0x0002)
    SharedSecretRequest,
    /// Shared Secret Response (0x0102)
    SharedSecretResponse,
    /// Shared Secret Error Response (0x0112)
    SharedSecretErrorResponse,
}

impl MessageKind {
    /// Wire code of this kind
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::BindingRequest => 0x0001,
            Self::BindingResponse => 0x0101,
            Self::BindingErrorResponse => 0x0111,
            Self::SharedSecretRequest => 0x0002,
            Self::SharedSecretResponse => 0x0102,
            Self::SharedSecretErrorResponse => 0x0112,
        }
    }

    /// Look up a kind by wire code
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0001 => Some(Self::BindingRequest),
            0x0101 => Some(Self::BindingResponse),
            0x0111 => Some(Self::BindingErrorResponse),
            0x0002 => Some(Self::SharedSecretRequest),
            0x0102 => Some(Self::SharedSecretResponse),
            0x0112 => Some(Self::SharedSecretErrorResponse),
            _ => None,
        }
    }

    /// Whether this kind answers a request
    #[must_use]
    pub const fn is_response(self) -> bool {
        !matches!(self, Self::BindingRequest | Self::SharedSecretRequest)
    }

    /// Whether this kind is an error response
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(
            self,
            Self::BindingErrorResponse | Self::SharedSecretErrorResponse
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BindingRequest => write!(f, "Binding Request"),
            Self::BindingResponse => write!(f, "Binding Response"),
            Self::BindingErrorResponse => write!(f, "Binding Error Response"),
            Self::SharedSecretRequest => write!(f, "Shared Secret Request"),
            Self::SharedSecretResponse => write!(f, "Shared Secret Response"),
            Self::SharedSecretErrorResponse => write!(f, "Shared Secret Error Response"),
        }
    }
}

/// STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    /// Message kind
    pub kind: MessageKind,
    /// Transaction ID (128 bits)
    pub transaction_id: TransactionId,
    /// Message attributes, in wire order
    pub attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// Create an empty message of `kind` with a fresh random transaction id
    #[must_use]
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            transaction_id: TransactionId::random(),
            attributes: Vec::new(),
        }
    }

    /// Create a plain Binding Request
    #[must_use]
    pub fn binding_request() -> Self {
        Self::new(MessageKind::BindingRequest)
    }

    /// Create an empty response of `kind` sharing the request's transaction id
    #[must_use]
    pub fn response_to(request: &StunMessage, kind: MessageKind) -> Self {
        Self {
            kind,
            transaction_id: request.transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Attach a CHANGE-REQUEST attribute
    #[must_use]
    pub fn with_change_request(self, request: ChangeRequest) -> Self {
        self.with_attribute(StunAttribute::ChangeRequest(request))
    }

    /// Append an attribute, builder style
    #[must_use]
    pub fn with_attribute(mut self, attr: StunAttribute) -> Self {
        self.attributes.push(attr);
        self
    }

    /// Append an attribute
    pub fn add_attribute(&mut self, attr: StunAttribute) {
        self.attributes.push(attr);
    }

    /// Encode message to bytes
    ///
    /// The body is limited by the 16-bit length field: attributes that would
    /// push it past 65532 bytes are left out.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for attr in &self.attributes {
            let encoded = attr.encode(&self.transaction_id);
            if body.len() + encoded.len() > MAX_VALUE_LEN {
                break;
            }
            body.extend_from_slice(&encoded);
        }
        let length = u16::try_from(body.len()).unwrap_or(u16::MAX);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len());
        bytes.extend_from_slice(&self.kind.code().to_be_bytes());
        bytes.extend_from_slice(&length.to_be_bytes());
        bytes.extend_from_slice(self.transaction_id.as_bytes());
        bytes.extend_from_slice(&body);

        bytes
    }

    /// Decode message from bytes
    ///
    /// Bytes past the length declared in the header are ignored.
    ///
    /// # Errors
    ///
    /// Returns `StunError` if the header is short or unknown, the declared
    /// length exceeds the datagram, or any attribute is malformed.
    pub fn decode(bytes: &[u8]) -> Result<Self, StunError> {
        if bytes.len() < HEADER_SIZE {
            return Err(StunError::MessageTooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let msg_type = u16::from_be_bytes([bytes[0], bytes[1]]);
        let kind = MessageKind::from_code(msg_type).ok_or(StunError::UnknownMessageType(msg_type))?;

        let msg_length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let available = bytes.len() - HEADER_SIZE;
        if msg_length > available {
            return Err(StunError::LengthMismatch {
                declared: msg_length,
                available,
            });
        }

        let mut id = [0u8; TRANSACTION_ID_SIZE];
        id.copy_from_slice(&bytes[4..HEADER_SIZE]);
        let transaction_id = TransactionId::from_bytes(id);

        let end = HEADER_SIZE + msg_length;
        let mut attributes = Vec::new();
        let mut offset = HEADER_SIZE;

        while offset < end {
            if offset + 4 > end {
                return Err(StunError::LengthMismatch {
                    declared: msg_length,
                    available: offset - HEADER_SIZE,
                });
            }

            let attr_type = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            let attr_length = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
            offset += 4;

            if offset + attr_length > end {
                return Err(StunError::TruncatedAttribute(attr_type));
            }

            let value = &bytes[offset..offset + attr_length];
            attributes.push(StunAttribute::decode(attr_type, value, &transaction_id)?);

            // Trailing padding of the final attribute may be omitted
            offset = (offset + padded_len(attr_length)).min(end);
        }

        Ok(Self {
            kind,
            transaction_id,
            attributes,
        })
    }

    /// Public endpoint observed by the server
    ///
    /// Prefers MAPPED-ADDRESS and falls back to XOR-MAPPED-ADDRESS.
    #[must_use]
    pub fn mapped_address(&self) -> Option<SocketAddr> {
        self.find(|attr| match attr {
            StunAttribute::MappedAddress(addr) => Some(*addr),
            _ => None,
        })
        .or_else(|| {
            self.find(|attr| match attr {
                StunAttribute::XorMappedAddress(addr) => Some(*addr),
                _ => None,
            })
        })
    }

    /// Alternate server endpoint
    ///
    /// Prefers CHANGED-ADDRESS and falls back to OTHER-ADDRESS.
    #[must_use]
    pub fn changed_address(&self) -> Option<SocketAddr> {
        self.find(|attr| match attr {
            StunAttribute::ChangedAddress(addr) => Some(*addr),
            _ => None,
        })
        .or_else(|| {
            self.find(|attr| match attr {
                StunAttribute::OtherAddress(addr) => Some(*addr),
                _ => None,
            })
        })
    }

    /// Endpoint the server sent the response from
    #[must_use]
    pub fn source_address(&self) -> Option<SocketAddr> {
        self.find(|attr| match attr {
            StunAttribute::SourceAddress(addr) | StunAttribute::ResponseOrigin(addr) => Some(*addr),
            _ => None,
        })
    }

    /// CHANGE-REQUEST directive, if any
    #[must_use]
    pub fn change_request(&self) -> Option<ChangeRequest> {
        self.find(|attr| match attr {
            StunAttribute::ChangeRequest(request) => Some(*request),
            _ => None,
        })
    }

    /// ERROR-CODE attribute, if any
    #[must_use]
    pub fn error_code(&self) -> Option<&ErrorCode> {
        self.attributes.iter().find_map(|attr| match attr {
            StunAttribute::ErrorCode(error) => Some(error),
            _ => None,
        })
    }

    fn find<T>(&self, f: impl Fn(&StunAttribute) -> Option<T>) -> Option<T> {
        self.attributes.iter().find_map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(seed: u8) -> TransactionId {
        TransactionId::from_bytes([seed; TRANSACTION_ID_SIZE])
    }

    #[test]
    fn test_binding_request_header() {
        let msg = StunMessage::binding_request();
        let encoded = msg.encode();

        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(&encoded[0..2], &[0x00, 0x01]);
        assert_eq!(&encoded[2..4], &[0x00, 0x00]);
        assert_eq!(&encoded[4..20], msg.transaction_id.as_bytes());
    }

    #[test]
    fn test_change_request_length() {
        let msg = StunMessage::binding_request().with_change_request(ChangeRequest::BOTH);
        let encoded = msg.encode();

        assert_eq!(encoded.len(), HEADER_SIZE + 8);
        assert_eq!(&encoded[2..4], &8u16.to_be_bytes());

        let decoded = StunMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.change_request(), Some(ChangeRequest::BOTH));
    }

    #[test]
    fn test_decode_server_response() {
        // Binding Response carrying MAPPED-ADDRESS, SOURCE-ADDRESS and
        // CHANGED-ADDRESS as a classic RFC 3489 server sends it.
        let mut bytes = vec![0x01, 0x01, 0x00, 0x24];
        bytes.extend_from_slice(&[0xAB; 16]);
        bytes.extend_from_slice(&[0x00, 0x01, 0x00, 0x08, 0x00, 0x01, 0x1F, 0x90, 203, 0, 113, 9]);
        bytes.extend_from_slice(&[0x00, 0x04, 0x00, 0x08, 0x00, 0x01, 0x0D, 0x96, 198, 51, 100, 1]);
        bytes.extend_from_slice(&[0x00, 0x05, 0x00, 0x08, 0x00, 0x01, 0x0D, 0x97, 198, 51, 100, 2]);

        let msg = StunMessage::decode(&bytes).unwrap();
        assert_eq!(msg.kind, MessageKind::BindingResponse);
        assert_eq!(msg.transaction_id, tid(0xAB));
        assert_eq!(msg.mapped_address(), Some("203.0.113.9:8080".parse().unwrap()));
        assert_eq!(msg.source_address(), Some("198.51.100.1:3478".parse().unwrap()));
        assert_eq!(msg.changed_address(), Some("198.51.100.2:3479".parse().unwrap()));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let msg = StunMessage::binding_request();
        let mut buf = msg.encode();
        buf.resize(512, 0);

        let decoded = StunMessage::decode(&buf).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_error_response() {
        let request = StunMessage::binding_request();
        let response = StunMessage::response_to(&request, MessageKind::BindingErrorResponse)
            .with_attribute(StunAttribute::ErrorCode(
                ErrorCode::new(400, "Bad Request").unwrap(),
            ));

        let decoded = StunMessage::decode(&response.encode()).unwrap();
        assert!(decoded.kind.is_error());
        assert_eq!(decoded.transaction_id, request.transaction_id);
        assert_eq!(decoded.error_code().map(ErrorCode::code), Some(400));
        assert_eq!(decoded.error_code().map(ErrorCode::reason), Some("Bad Request"));
    }

    #[test]
    fn test_mapped_address_falls_back_to_xor() {
        let addr: SocketAddr = "192.0.2.44:61000".parse().unwrap();
        let msg = StunMessage::response_to(
            &StunMessage::binding_request(),
            MessageKind::BindingResponse,
        )
        .with_attribute(StunAttribute::XorMappedAddress(addr));

        let decoded = StunMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.mapped_address(), Some(addr));
    }

    #[test]
    fn test_mapped_address_preferred_over_xor() {
        let plain: SocketAddr = "192.0.2.1:1000".parse().unwrap();
        let xored: SocketAddr = "192.0.2.2:2000".parse().unwrap();
        let msg = StunMessage::binding_request()
            .with_attribute(StunAttribute::XorMappedAddress(xored))
            .with_attribute(StunAttribute::MappedAddress(plain));

        assert_eq!(msg.mapped_address(), Some(plain));
    }

    #[test]
    fn test_changed_address_falls_back_to_other_address() {
        let other: SocketAddr = "198.51.100.2:3479".parse().unwrap();
        let msg = StunMessage::binding_request().with_attribute(StunAttribute::OtherAddress(other));
        assert_eq!(msg.changed_address(), Some(other));
        assert_eq!(StunMessage::binding_request().changed_address(), None);
    }

    #[test]
    fn test_decode_error_too_short() {
        let result = StunMessage::decode(&[0u8; 10]);
        assert_eq!(
            result.unwrap_err(),
            StunError::MessageTooShort {
                expected: HEADER_SIZE,
                actual: 10
            }
        );
    }

    #[test]
    fn test_decode_error_unknown_type() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0..2].copy_from_slice(&0x0003u16.to_be_bytes());
        assert_eq!(
            StunMessage::decode(&bytes).unwrap_err(),
            StunError::UnknownMessageType(0x0003)
        );
    }

    #[test]
    fn test_decode_error_length_exceeds_datagram() {
        let mut bytes = StunMessage::binding_request().encode();
        bytes[2..4].copy_from_slice(&8u16.to_be_bytes());
        assert!(matches!(
            StunMessage::decode(&bytes),
            Err(StunError::LengthMismatch {
                declared: 8,
                available: 0
            })
        ));
    }

    #[test]
    fn test_decode_error_truncated_attribute() {
        let mut bytes = StunMessage::binding_request().encode();
        bytes[2..4].copy_from_slice(&8u16.to_be_bytes());
        bytes.extend_from_slice(&[0x00, 0x01, 0x00, 0x08, 0x00, 0x01, 0x00, 0x50]);
        assert_eq!(
            StunMessage::decode(&bytes).unwrap_err(),
            StunError::TruncatedAttribute(0x0001)
        );
    }

    #[test]
    fn test_decode_error_malformed_mapped_address() {
        let mut bytes = StunMessage::binding_request().encode();
        bytes[2..4].copy_from_slice(&8u16.to_be_bytes());
        bytes.extend_from_slice(&[0x00, 0x01, 0x00, 0x04, 0x00, 0x07, 0x00, 0x50]);
        assert!(matches!(
            StunMessage::decode(&bytes),
            Err(StunError::InvalidAttribute {
                attr_type: 0x0001,
                ..
            })
        ));
    }

    #[test]
    fn test_oversized_body_drops_trailing_attributes() {
        let message = StunMessage::binding_request()
            .with_attribute(StunAttribute::Unknown(0x9999, vec![1; 40_000]))
            .with_attribute(StunAttribute::Unknown(0x9998, vec![2; 40_000]));

        let bytes = message.encode();
        let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        assert_eq!(declared, bytes.len() - HEADER_SIZE);
        assert_eq!(declared, 4 + 40_000);

        let decoded = StunMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.attributes.len(), 1);
    }

    #[test]
    fn test_message_kind_codes() {
        let kinds = [
            MessageKind::BindingRequest,
            MessageKind::BindingResponse,
            MessageKind::BindingErrorResponse,
            MessageKind::SharedSecretRequest,
            MessageKind::SharedSecretResponse,
            MessageKind::SharedSecretErrorResponse,
        ];

        for kind in kinds {
            assert_eq!(MessageKind::from_code(kind.code()), Some(kind));
        }
        assert!(!MessageKind::BindingRequest.is_response());
        assert!(MessageKind::BindingResponse.is_response());
        assert!(!MessageKind::BindingResponse.is_error());
    }

    #[test]
    fn test_transaction_ids_are_unique() {
        let a = StunMessage::binding_request();
        let b = StunMessage::binding_request();
        assert_ne!(a.transaction_id, b.transaction_id);
    }

    #[test]
    fn test_transaction_id_display() {
        let id = TransactionId::from_bytes([0x0F; TRANSACTION_ID_SIZE]);
        assert_eq!(id.to_string(), "0f".repeat(16));
    }
}
