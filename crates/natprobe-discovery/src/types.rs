//! NAT classification results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// NAT type classification (RFC 3489 Section 10.1)
///
/// Different NAT types require different traversal strategies:
/// - Open Internet: No NAT, direct connection possible
/// - Full Cone: Easy to traverse, any external host can send
/// - Restricted Cone: Only contacted IPs can send back
/// - Port Restricted Cone: Only contacted IP:port pairs can send back
/// - Symmetric: Different mapping per destination, requires relay
/// - Symmetric UDP Firewall: Public address, but inbound filtered like a
///   port restricted NAT
/// - UDP Blocked: No UDP reaches the server at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatType {
    /// No UDP connectivity to the STUN server
    UdpBlocked,
    /// No NAT, no firewall filtering
    OpenInternet,
    /// No NAT, but unsolicited inbound UDP is dropped
    SymmetricUdpFirewall,
    /// Any external host can send to the mapped port
    FullCone,
    /// Different mapping per destination
    Symmetric,
    /// Only contacted IPs can send
    RestrictedCone,
    /// Only contacted IP:port can send
    PortRestrictedCone,
}

impl NatType {
    /// Recommended way to reach a peer behind this NAT
    #[must_use]
    pub const fn traversal_strategy(self) -> TraversalStrategy {
        match self {
            Self::OpenInternet | Self::FullCone => TraversalStrategy::Direct,
            Self::RestrictedCone | Self::PortRestrictedCone | Self::SymmetricUdpFirewall => {
                TraversalStrategy::HolePunch
            }
            Self::Symmetric | Self::UdpBlocked => TraversalStrategy::Relay,
        }
    }

    /// Whether address translation was observed
    #[must_use]
    pub const fn is_natted(self) -> bool {
        matches!(
            self,
            Self::FullCone | Self::Symmetric | Self::RestrictedCone | Self::PortRestrictedCone
        )
    }
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UdpBlocked => write!(f, "UDP Blocked"),
            Self::OpenInternet => write!(f, "Open Internet"),
            Self::SymmetricUdpFirewall => write!(f, "Symmetric UDP Firewall"),
            Self::FullCone => write!(f, "Full Cone NAT"),
            Self::Symmetric => write!(f, "Symmetric NAT"),
            Self::RestrictedCone => write!(f, "Restricted Cone NAT"),
            Self::PortRestrictedCone => write!(f, "Port Restricted Cone NAT"),
        }
    }
}

/// Peer-to-peer connectivity strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalStrategy {
    /// Connect straight to the public endpoint
    Direct,
    /// Simultaneous open through the NAT
    HolePunch,
    /// Route through a relay
    Relay,
}

impl fmt::Display for TraversalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::HolePunch => write!(f, "hole punch"),
            Self::Relay => write!(f, "relay"),
        }
    }
}

/// Outcome of a NAT classification
///
/// Every type except [`NatType::UdpBlocked`] carries the public endpoint
/// reported by the first binding test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    nat_type: NatType,
    public_endpoint: Option<SocketAddr>,
}

impl ClassificationResult {
    /// UDP could not reach the server
    #[must_use]
    pub const fn blocked() -> Self {
        Self {
            nat_type: NatType::UdpBlocked,
            public_endpoint: None,
        }
    }

    /// Classification with a known public endpoint
    ///
    /// `UdpBlocked` never carries an endpoint; passing it yields
    /// [`ClassificationResult::blocked`].
    #[must_use]
    pub const fn new(nat_type: NatType, public_endpoint: SocketAddr) -> Self {
        match nat_type {
            NatType::UdpBlocked => Self::blocked(),
            _ => Self {
                nat_type,
                public_endpoint: Some(public_endpoint),
            },
        }
    }

    /// Detected NAT type
    #[must_use]
    pub const fn nat_type(&self) -> NatType {
        self.nat_type
    }

    /// Public endpoint, absent only when UDP is blocked
    #[must_use]
    pub const fn public_endpoint(&self) -> Option<SocketAddr> {
        self.public_endpoint
    }

    /// Shorthand for `nat_type().traversal_strategy()`
    #[must_use]
    pub const fn traversal_strategy(&self) -> TraversalStrategy {
        self.nat_type.traversal_strategy()
    }
}

impl fmt::Display for ClassificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.public_endpoint {
            Some(endpoint) => write!(f, "{} ({endpoint})", self.nat_type),
            None => write!(f, "{}", self.nat_type),
        }
    }
}
