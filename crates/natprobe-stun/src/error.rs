//! Error types for the STUN message codec.

use thiserror::Error;

/// STUN decoding and validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StunError {
    /// Datagram shorter than the fixed header
    #[error("STUN message too short: expected at least {expected}, got {actual}")]
    MessageTooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Message type is not one of the RFC 3489 kinds
    #[error("unknown STUN message type: 0x{0:04X}")]
    UnknownMessageType(u16),

    /// Header length field disagrees with the datagram size
    #[error("STUN length mismatch: header declares {declared} attribute bytes, {available} available")]
    LengthMismatch {
        /// Attribute bytes declared in the header
        declared: usize,
        /// Attribute bytes actually present
        available: usize,
    },

    /// Attribute runs past the end of the message
    #[error("truncated STUN attribute 0x{0:04X}")]
    TruncatedAttribute(u16),

    /// Attribute value could not be interpreted
    #[error("invalid STUN attribute 0x{attr_type:04X}: {reason}")]
    InvalidAttribute {
        /// Attribute type code
        attr_type: u16,
        /// What was wrong with the value
        reason: &'static str,
    },

    /// ERROR-CODE outside the 300..=699 range
    #[error("invalid STUN error code {0}: must be within 300..=699")]
    InvalidErrorCode(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stun_error_display() {
        let errors = vec![
            (
                StunError::MessageTooShort {
                    expected: 20,
                    actual: 4,
                },
                "STUN message too short: expected at least 20, got 4",
            ),
            (
                StunError::UnknownMessageType(0x0abc),
                "unknown STUN message type: 0x0ABC",
            ),
            (
                StunError::TruncatedAttribute(0x0001),
                "truncated STUN attribute 0x0001",
            ),
            (
                StunError::InvalidErrorCode(42),
                "invalid STUN error code 42: must be within 300..=699",
            ),
        ];

        for (err, expected_msg) in errors {
            assert_eq!(err.to_string(), expected_msg);
        }
    }
}
