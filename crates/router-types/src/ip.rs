//! IP prefix and netmask helpers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Address family of an address, route or packet-filter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    /// IPv4 (`inet`).
    V4,
    /// IPv6 (`inet6`).
    V6,
}

impl AddressFamily {
    /// Returns the maximum prefix length for the family.
    pub const fn max_prefix_len(&self) -> u8 {
        match self {
            AddressFamily::V4 => 32,
            AddressFamily::V6 => 128,
        }
    }

    /// Returns the family of an address.
    pub const fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

/// An address with a prefix length in CIDR notation, e.g. `192.168.42.1/24`.
///
/// Host bits are kept: `192.168.42.1/24` is an interface address, not the
/// `192.168.42.0/24` network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpPrefix {
    address: IpAddr,
    prefix_len: u8,
}

impl IpPrefix {
    /// Creates a new prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix length exceeds 32 (IPv4) or 128 (IPv6).
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, ParseError> {
        let max_len = AddressFamily::of(&address).max_prefix_len();
        if prefix_len > max_len {
            return Err(ParseError::InvalidIpPrefix(format!(
                "{}/{}: prefix length exceeds maximum {}",
                address, prefix_len, max_len
            )));
        }

        Ok(IpPrefix {
            address,
            prefix_len,
        })
    }

    /// Returns a host prefix (/32 or /128) for an address.
    pub fn host(address: IpAddr) -> Self {
        let prefix_len = AddressFamily::of(&address).max_prefix_len();
        IpPrefix {
            address,
            prefix_len,
        }
    }

    /// Returns the default route prefix (`0.0.0.0/0` or `::/0`).
    pub const fn default_route(family: AddressFamily) -> Self {
        let address = match family {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        IpPrefix {
            address,
            prefix_len: 0,
        }
    }

    /// Returns the address, host bits included.
    pub const fn address(&self) -> IpAddr {
        self.address
    }

    /// Returns the prefix length in bits.
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns the address family.
    pub const fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.address)
    }

    /// Returns true if this is a host route (/32 for IPv4, /128 for IPv6).
    pub const fn is_host_route(&self) -> bool {
        self.prefix_len == self.family().max_prefix_len()
    }

    /// Returns true if this is the default route.
    pub const fn is_default(&self) -> bool {
        self.prefix_len == 0
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, len_str) = s
            .rsplit_once('/')
            .ok_or_else(|| ParseError::InvalidIpPrefix(s.to_string()))?;

        let address: IpAddr = addr_str
            .parse()
            .map_err(|_| ParseError::InvalidIpAddress(addr_str.to_string()))?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;

        IpPrefix::new(address, prefix_len)
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(prefix: IpPrefix) -> String {
        prefix.to_string()
    }
}

/// Returns the prefix length of a contiguous netmask given as raw bytes
/// (4 bytes for IPv4, 16 for IPv6).
///
/// # Errors
///
/// Returns an error for any other length or for a non-contiguous mask such as
/// `255.0.255.0`.
pub fn mask_prefix_len(mask: &[u8]) -> Result<u8, ParseError> {
    if mask.len() != 4 && mask.len() != 16 {
        return Err(ParseError::InvalidNetmask(format!(
            "unexpected mask length {}",
            mask.len()
        )));
    }

    let mut ones: u32 = 0;
    let mut seen_zero = false;
    for byte in mask {
        for bit in (0..8).rev() {
            if byte & (1 << bit) != 0 {
                if seen_zero {
                    return Err(ParseError::InvalidNetmask(format!(
                        "non-contiguous mask {:02x?}",
                        mask
                    )));
                }
                ones += 1;
            } else {
                seen_zero = true;
            }
        }
    }
    // At most 128 ones.
    Ok(ones as u8)
}

/// Parses a dotted-quad IPv4 subnet mask (e.g. `255.255.255.128`) into its
/// prefix length (e.g. 25).
pub fn subnet_mask_size(mask: &str) -> Result<u8, ParseError> {
    let parts: Vec<&str> = mask.split('.').collect();
    if parts.len() != 4 {
        return Err(ParseError::InvalidNetmask(format!(
            "unexpected number of parts in subnet mask {:?}: got {}, want 4",
            mask,
            parts.len()
        )));
    }

    let mut numeric = [0u8; 4];
    for (byte, part) in numeric.iter_mut().zip(&parts) {
        *byte = part
            .parse()
            .map_err(|_| ParseError::InvalidNetmask(format!("{:?} in {:?}", part, mask)))?;
    }
    mask_prefix_len(&numeric)
}
