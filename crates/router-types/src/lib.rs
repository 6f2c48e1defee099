//! Common value types for the router control plane.
//!
//! - [`MacAddress`]: 48-bit hardware addresses
//! - [`IpPrefix`]: addresses with a prefix length (CIDR notation)
//! - [`Dhcp4Lease`] / [`Dhcp6Lease`]: lease artifacts written by the DHCP clients

mod ip;
mod lease;
mod mac;

pub use ip::{mask_prefix_len, subnet_mask_size, AddressFamily, IpPrefix};
pub use lease::{Dhcp4Lease, Dhcp6Lease};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid netmask: {0}")]
    InvalidNetmask(String),
}
