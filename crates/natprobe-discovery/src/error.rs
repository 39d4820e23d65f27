//! Error types for NAT classification.

use std::io;
use thiserror::Error;

/// Classification errors
///
/// Timeouts are not errors: a transaction without a response is an input to
/// the decision tree. The one exception is test I(II), where silence cannot be
/// mapped to any NAT type and surfaces as [`ClassifyError::FatalProtocol`].
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Caller supplied an unusable argument; nothing was sent
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Server host name did not resolve
    #[error("failed to resolve STUN server '{host}': {source}")]
    HostResolution {
        /// Host as given by the caller
        host: String,
        /// Underlying resolver error
        #[source]
        source: io::Error,
    },

    /// The server's alternate endpoint never answered
    #[error("STUN protocol failure: {0}")]
    FatalProtocol(&'static str),

    /// The server answered with a Binding Error Response
    #[error("STUN server returned error {code}: {reason}")]
    ErrorResponse {
        /// ERROR-CODE value, 0 if the attribute was missing
        code: u16,
        /// Reason phrase
        reason: String,
    },

    /// A response lacked both MAPPED-ADDRESS and XOR-MAPPED-ADDRESS
    #[error("{0} response carried no mapped address")]
    MissingMappedAddress(&'static str),

    /// Local socket error outside the retry loop
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),
}
