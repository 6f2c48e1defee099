//! Lease artifacts persisted by the DHCP client daemons.
//!
//! The DHCPv4 and DHCPv6 clients write these as `wire/lease.json` below their
//! state directories; netconfigd only reads them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::IpAddr;

use crate::ip::{mask_prefix_len, IpPrefix};
use crate::ParseError;

/// A DHCPv4 lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dhcp4Lease {
    /// When the client will attempt to renew.
    #[serde(rename = "valid_until", default)]
    pub renew_after: Option<DateTime<Utc>>,
    /// Address assigned to the client, e.g. `85.195.207.62`.
    pub client_ip: String,
    /// Dotted-quad subnet mask, e.g. `255.255.255.128`. May be empty if the
    /// server did not send one.
    #[serde(default)]
    pub subnet_mask: String,
    /// Default gateway.
    #[serde(default)]
    pub router: String,
    /// Resolvers offered by the server.
    #[serde(default)]
    pub dns: Vec<String>,
}

/// A DHCPv6 lease carrying delegated prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dhcp6Lease {
    /// When the client will attempt to renew.
    #[serde(rename = "valid_until", default)]
    pub renew_after: Option<DateTime<Utc>>,
    /// Delegated prefixes.
    #[serde(default, deserialize_with = "deserialize_prefixes")]
    pub prefixes: Vec<IpPrefix>,
    /// Resolvers offered by the server.
    #[serde(default)]
    pub dns: Vec<String>,
}

/// Wire forms accepted for a delegated prefix: a CIDR string, or an
/// address plus base64-encoded netmask bytes.
#[derive(Deserialize)]
#[serde(untagged)]
enum PrefixRepr {
    Cidr(String),
    Network {
        #[serde(rename = "IP")]
        ip: IpAddr,
        #[serde(rename = "Mask")]
        mask: String,
    },
}

impl TryFrom<PrefixRepr> for IpPrefix {
    type Error = ParseError;

    fn try_from(repr: PrefixRepr) -> Result<Self, Self::Error> {
        match repr {
            PrefixRepr::Cidr(s) => s.parse(),
            PrefixRepr::Network { ip, mask } => {
                let bytes = STANDARD
                    .decode(mask.as_bytes())
                    .map_err(|e| ParseError::InvalidNetmask(format!("{:?}: {}", mask, e)))?;
                // IPv4 networks may carry either a 4 or a 16 byte mask.
                let prefix_len = match (ip, bytes.len()) {
                    (IpAddr::V4(_), 16) => mask_prefix_len(&bytes)?.saturating_sub(96),
                    _ => mask_prefix_len(&bytes)?,
                };
                IpPrefix::new(ip, prefix_len)
            }
        }
    }
}

fn deserialize_prefixes<'de, D>(deserializer: D) -> Result<Vec<IpPrefix>, D::Error>
where
    D: Deserializer<'de>,
{
    let reprs = Vec::<PrefixRepr>::deserialize(deserializer)?;
    reprs
        .into_iter()
        .map(|repr| IpPrefix::try_from(repr).map_err(serde::de::Error::custom))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dhcp4_lease_decode() {
        let json = r#"{
            "valid_until": "2018-06-02T13:04:56Z",
            "client_ip": "85.195.207.62",
            "subnet_mask": "255.255.255.128",
            "router": "85.195.207.1",
            "dns": ["77.109.128.2", "213.144.129.20"]
        }"#;
        let lease: Dhcp4Lease = serde_json::from_str(json).unwrap();
        assert_eq!(lease.client_ip, "85.195.207.62");
        assert_eq!(lease.subnet_mask, "255.255.255.128");
        assert_eq!(lease.router, "85.195.207.1");
        assert_eq!(lease.dns.len(), 2);
        assert!(lease.renew_after.is_some());
    }

    #[test]
    fn test_dhcp4_lease_without_mask() {
        let lease: Dhcp4Lease = serde_json::from_str(r#"{"client_ip": "10.0.0.2"}"#).unwrap();
        assert!(lease.subnet_mask.is_empty());
        assert!(lease.renew_after.is_none());
    }

    #[test]
    fn test_dhcp6_lease_cidr_prefixes() {
        let json = r#"{"prefixes": ["2a02:168:4a00::/48"]}"#;
        let lease: Dhcp6Lease = serde_json::from_str(json).unwrap();
        assert_eq!(lease.prefixes.len(), 1);
        assert_eq!(lease.prefixes[0].to_string(), "2a02:168:4a00::/48");
    }

    #[test]
    fn test_dhcp6_lease_network_prefixes() {
        // 48 one bits followed by 80 zero bits.
        let json = r#"{"prefixes": [{"IP": "2a02:168:4a00::", "Mask": "////////AAAAAAAAAAAAAA=="}]}"#;
        let lease: Dhcp6Lease = serde_json::from_str(json).unwrap();
        assert_eq!(lease.prefixes[0].to_string(), "2a02:168:4a00::/48");
    }

    #[test]
    fn test_dhcp6_lease_bad_mask() {
        let json = r#"{"prefixes": [{"IP": "2a02:168:4a00::", "Mask": "not base64!"}]}"#;
        assert!(serde_json::from_str::<Dhcp6Lease>(json).is_err());
    }
}
