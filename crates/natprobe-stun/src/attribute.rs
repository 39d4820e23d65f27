//! STUN attributes (RFC 3489 Section 11.2)
//!
//! Every attribute is type-length-value encoded. Values are padded to a 4-byte
//! boundary on the wire; the length field carries the unpadded size.

use crate::error::StunError;
use crate::message::TransactionId;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub(crate) const MAPPED_ADDRESS: u16 = 0x0001;
pub(crate) const RESPONSE_ADDRESS: u16 = 0x0002;
pub(crate) const CHANGE_REQUEST: u16 = 0x0003;
pub(crate) const SOURCE_ADDRESS: u16 = 0x0004;
pub(crate) const CHANGED_ADDRESS: u16 = 0x0005;
pub(crate) const USERNAME: u16 = 0x0006;
pub(crate) const PASSWORD: u16 = 0x0007;
pub(crate) const ERROR_CODE: u16 = 0x0009;
pub(crate) const UNKNOWN_ATTRIBUTES: u16 = 0x000A;
pub(crate) const REFLECTED_FROM: u16 = 0x000B;
pub(crate) const XOR_MAPPED_ADDRESS: u16 = 0x0020;
/// Pre-standard XOR-MAPPED-ADDRESS code still sent by older servers
pub(crate) const XOR_MAPPED_ADDRESS_LEGACY: u16 = 0x8020;
pub(crate) const SOFTWARE: u16 = 0x8022;
pub(crate) const RESPONSE_ORIGIN: u16 = 0x802B;
pub(crate) const OTHER_ADDRESS: u16 = 0x802C;

/// Largest attribute value or message body; a multiple of four that fits the
/// 16-bit length fields
pub(crate) const MAX_VALUE_LEN: usize = 65532;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

const CHANGE_IP_FLAG: u32 = 0x04;
const CHANGE_PORT_FLAG: u32 = 0x02;

/// CHANGE-REQUEST attribute (RFC 3489 Section 11.2.4)
///
/// Asks the server to answer from a different IP and/or port than the one
/// the request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeRequest {
    /// Respond from the alternate IP address
    pub change_ip: bool,
    /// Respond from the alternate port
    pub change_port: bool,
}

impl ChangeRequest {
    /// Change both IP and port (test II)
    pub const BOTH: Self = Self::new(true, true);

    /// Change the port only (test III)
    pub const PORT_ONLY: Self = Self::new(false, true);

    /// Create a change request
    #[must_use]
    pub const fn new(change_ip: bool, change_port: bool) -> Self {
        Self {
            change_ip,
            change_port,
        }
    }

    fn to_bits(self) -> u32 {
        let mut bits = 0;
        if self.change_ip {
            bits |= CHANGE_IP_FLAG;
        }
        if self.change_port {
            bits |= CHANGE_PORT_FLAG;
        }
        bits
    }

    fn from_bits(bits: u32) -> Self {
        Self::new(bits & CHANGE_IP_FLAG != 0, bits & CHANGE_PORT_FLAG != 0)
    }
}

/// ERROR-CODE attribute (RFC 3489 Section 11.2.9)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode {
    code: u16,
    reason: String,
}

impl ErrorCode {
    /// Create an error code with a reason phrase
    ///
    /// # Errors
    ///
    /// Returns `StunError::InvalidErrorCode` if `code` is outside 300..=699.
    pub fn new(code: u16, reason: impl Into<String>) -> Result<Self, StunError> {
        if !(300..=699).contains(&code) {
            return Err(StunError::InvalidErrorCode(code));
        }
        Ok(Self {
            code,
            reason: reason.into(),
        })
    }

    /// Numeric code, e.g. 400
    #[must_use]
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Reason phrase
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Hundreds digit of the code
    #[must_use]
    pub fn class(&self) -> u8 {
        (self.code / 100) as u8
    }

    /// Code modulo 100
    #[must_use]
    pub fn number(&self) -> u8 {
        (self.code % 100) as u8
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// STUN attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StunAttribute {
    /// Public endpoint the server observed (0x0001)
    MappedAddress(SocketAddr),
    /// Where the response should be sent (0x0002)
    ResponseAddress(SocketAddr),
    /// Change IP/port directive (0x0003)
    ChangeRequest(ChangeRequest),
    /// Endpoint the response was sent from (0x0004)
    SourceAddress(SocketAddr),
    /// Alternate server endpoint (0x0005)
    ChangedAddress(SocketAddr),
    /// Username (0x0006)
    Username(String),
    /// Password (0x0007)
    Password(String),
    /// Error code and reason phrase (0x0009)
    ErrorCode(ErrorCode),
    /// Attribute types the server did not understand (0x000A)
    ///
    /// Odd lists are padded on the wire by repeating the last type; on decode
    /// a repeat closing an even list is dropped as that padding.
    UnknownAttributes(Vec<u16>),
    /// Identity of the original requester (0x000B)
    ReflectedFrom(SocketAddr),
    /// Obfuscated mapped address (0x0020, 0x8020)
    XorMappedAddress(SocketAddr),
    /// Server software description (0x8022)
    Software(String),
    /// RFC 5780 source of the response (0x802B)
    ResponseOrigin(SocketAddr),
    /// RFC 5780 alternate server endpoint (0x802C)
    OtherAddress(SocketAddr),
    /// Unrecognized attribute, kept verbatim
    Unknown(u16, Vec<u8>),
}

impl StunAttribute {
    /// Attribute type code
    #[must_use]
    pub fn attr_type(&self) -> u16 {
        match self {
            Self::MappedAddress(_) => MAPPED_ADDRESS,
            Self::ResponseAddress(_) => RESPONSE_ADDRESS,
            Self::ChangeRequest(_) => CHANGE_REQUEST,
            Self::SourceAddress(_) => SOURCE_ADDRESS,
            Self::ChangedAddress(_) => CHANGED_ADDRESS,
            Self::Username(_) => USERNAME,
            Self::Password(_) => PASSWORD,
            Self::ErrorCode(_) => ERROR_CODE,
            Self::UnknownAttributes(_) => UNKNOWN_ATTRIBUTES,
            Self::ReflectedFrom(_) => REFLECTED_FROM,
            Self::XorMappedAddress(_) => XOR_MAPPED_ADDRESS,
            Self::Software(_) => SOFTWARE,
            Self::ResponseOrigin(_) => RESPONSE_ORIGIN,
            Self::OtherAddress(_) => OTHER_ADDRESS,
            Self::Unknown(t, _) => *t,
        }
    }

    /// Encode attribute header, value and padding
    ///
    /// Values longer than the 16-bit length field allows are cut at
    /// 65532 bytes.
    pub(crate) fn encode(&self, transaction_id: &TransactionId) -> Vec<u8> {
        let mut value = self.encode_value(transaction_id);
        value.truncate(MAX_VALUE_LEN);
        let length = u16::try_from(value.len()).unwrap_or(u16::MAX);

        let mut bytes = Vec::with_capacity(4 + padded_len(value.len()));
        bytes.extend_from_slice(&self.attr_type().to_be_bytes());
        bytes.extend_from_slice(&length.to_be_bytes());
        bytes.extend_from_slice(&value);

        let padding = padded_len(value.len()) - value.len();
        bytes.extend(std::iter::repeat_n(0, padding));

        bytes
    }

    fn encode_value(&self, transaction_id: &TransactionId) -> Vec<u8> {
        match self {
            Self::MappedAddress(addr)
            | Self::ResponseAddress(addr)
            | Self::SourceAddress(addr)
            | Self::ChangedAddress(addr)
            | Self::ReflectedFrom(addr)
            | Self::ResponseOrigin(addr)
            | Self::OtherAddress(addr) => encode_address(*addr),
            Self::XorMappedAddress(addr) => encode_address(xor_address(*addr, transaction_id)),
            Self::ChangeRequest(request) => request.to_bits().to_be_bytes().to_vec(),
            Self::Username(s) | Self::Password(s) | Self::Software(s) => s.as_bytes().to_vec(),
            Self::ErrorCode(error) => {
                let mut value = vec![0, 0, error.class(), error.number()];
                value.extend_from_slice(error.reason().as_bytes());
                value
            }
            Self::UnknownAttributes(types) => {
                let mut value: Vec<u8> = types.iter().flat_map(|t| t.to_be_bytes()).collect();
                // Odd counts repeat one type to keep the value 32-bit aligned
                if let Some(last) = types.last().filter(|_| types.len() % 2 == 1) {
                    value.extend_from_slice(&last.to_be_bytes());
                }
                value
            }
            Self::Unknown(_, data) => data.clone(),
        }
    }

    /// Decode an attribute value
    pub(crate) fn decode(
        attr_type: u16,
        value: &[u8],
        transaction_id: &TransactionId,
    ) -> Result<Self, StunError> {
        let attr = match attr_type {
            MAPPED_ADDRESS => Self::MappedAddress(decode_address(attr_type, value)?),
            RESPONSE_ADDRESS => Self::ResponseAddress(decode_address(attr_type, value)?),
            SOURCE_ADDRESS => Self::SourceAddress(decode_address(attr_type, value)?),
            CHANGED_ADDRESS => Self::ChangedAddress(decode_address(attr_type, value)?),
            REFLECTED_FROM => Self::ReflectedFrom(decode_address(attr_type, value)?),
            RESPONSE_ORIGIN => Self::ResponseOrigin(decode_address(attr_type, value)?),
            OTHER_ADDRESS => Self::OtherAddress(decode_address(attr_type, value)?),
            XOR_MAPPED_ADDRESS | XOR_MAPPED_ADDRESS_LEGACY => {
                let obfuscated = decode_address(attr_type, value)?;
                Self::XorMappedAddress(xor_address(obfuscated, transaction_id))
            }
            CHANGE_REQUEST => {
                let bits: [u8; 4] = value.try_into().map_err(|_| StunError::InvalidAttribute {
                    attr_type,
                    reason: "CHANGE-REQUEST must be 4 bytes",
                })?;
                Self::ChangeRequest(ChangeRequest::from_bits(u32::from_be_bytes(bits)))
            }
            USERNAME => Self::Username(String::from_utf8_lossy(value).into_owned()),
            PASSWORD => Self::Password(String::from_utf8_lossy(value).into_owned()),
            SOFTWARE => Self::Software(String::from_utf8_lossy(value).into_owned()),
            ERROR_CODE => {
                if value.len() < 4 {
                    return Err(StunError::InvalidAttribute {
                        attr_type,
                        reason: "ERROR-CODE shorter than 4 bytes",
                    });
                }
                let class = u16::from(value[2] & 0x07);
                let number = u16::from(value[3]);
                if number > 99 {
                    return Err(StunError::InvalidAttribute {
                        attr_type,
                        reason: "ERROR-CODE number above 99",
                    });
                }
                let reason = String::from_utf8_lossy(&value[4..])
                    .trim_end_matches(['\0', ' '])
                    .to_string();
                let error = ErrorCode::new(class * 100 + number, reason).map_err(|_| {
                    StunError::InvalidAttribute {
                        attr_type,
                        reason: "ERROR-CODE class outside 3..=6",
                    }
                })?;
                Self::ErrorCode(error)
            }
            UNKNOWN_ATTRIBUTES => {
                if value.len() % 2 != 0 {
                    return Err(StunError::InvalidAttribute {
                        attr_type,
                        reason: "UNKNOWN-ATTRIBUTES length must be even",
                    });
                }
                let mut types: Vec<u16> = value
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                // An even list ending in a repeat carries alignment padding
                let padded = types.len() % 2 == 0 && matches!(types[..], [.., a, b] if a == b);
                if padded {
                    types.pop();
                }
                Self::UnknownAttributes(types)
            }
            _ => Self::Unknown(attr_type, value.to_vec()),
        };

        Ok(attr)
    }
}

/// Value length rounded up to the next 4-byte boundary
pub(crate) fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn encode_address(addr: SocketAddr) -> Vec<u8> {
    let mut value = Vec::with_capacity(20);
    value.push(0); // Reserved
    match addr.ip() {
        IpAddr::V4(ipv4) => {
            value.push(FAMILY_IPV4);
            value.extend_from_slice(&addr.port().to_be_bytes());
            value.extend_from_slice(&ipv4.octets());
        }
        IpAddr::V6(ipv6) => {
            value.push(FAMILY_IPV6);
            value.extend_from_slice(&addr.port().to_be_bytes());
            value.extend_from_slice(&ipv6.octets());
        }
    }
    value
}

fn decode_address(attr_type: u16, value: &[u8]) -> Result<SocketAddr, StunError> {
    if value.len() < 4 {
        return Err(StunError::InvalidAttribute {
            attr_type,
            reason: "address shorter than 4 bytes",
        });
    }

    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = match (value[1], &value[4..]) {
        (FAMILY_IPV4, octets) if octets.len() == 4 => {
            IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
        }
        (FAMILY_IPV6, octets) if octets.len() == 16 => {
            let mut ip_bytes = [0u8; 16];
            ip_bytes.copy_from_slice(octets);
            IpAddr::V6(Ipv6Addr::from(ip_bytes))
        }
        (FAMILY_IPV4 | FAMILY_IPV6, _) => {
            return Err(StunError::InvalidAttribute {
                attr_type,
                reason: "address length does not match family",
            });
        }
        _ => {
            return Err(StunError::InvalidAttribute {
                attr_type,
                reason: "unknown address family",
            });
        }
    };

    Ok(SocketAddr::new(ip, port))
}

/// XOR an address with the transaction id (RFC 5389 Section 15.2)
///
/// The first four id bytes take the place of the magic cookie, so the same
/// routine works whether or not the peer speaks RFC 5389. Applying it twice
/// restores the original address.
fn xor_address(addr: SocketAddr, transaction_id: &TransactionId) -> SocketAddr {
    let key = transaction_id.as_bytes();
    let port = addr.port() ^ u16::from_be_bytes([key[0], key[1]]);

    let ip = match addr.ip() {
        IpAddr::V4(ipv4) => {
            let mut octets = ipv4.octets();
            for (octet, k) in octets.iter_mut().zip(key) {
                *octet ^= k;
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        IpAddr::V6(ipv6) => {
            let mut octets = ipv6.octets();
            for (octet, k) in octets.iter_mut().zip(key) {
                *octet ^= k;
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };

    SocketAddr::new(ip, port)
}
