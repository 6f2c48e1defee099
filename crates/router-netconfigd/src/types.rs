//! Declared configuration: interfaces, bridges and port forwardings.

use serde::{Deserialize, Deserializer, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use router_cfgmgr_common::{CfgMgrError, CfgMgrResult};
use router_types::{IpPrefix, MacAddress};

use crate::files::{INTERFACES_FILE, PORT_FORWARDINGS_FILE};

/// A declared interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDetails {
    /// Hardware address identifying the physical link, e.g. `dc:9b:9c:ee:72:fd`.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub hardware_addr: Option<MacAddress>,
    /// Hardware address to present instead of the burned-in one.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub spoof_hardware_addr: Option<MacAddress>,
    /// Name the link should carry, e.g. `uplink0` or `lan0`.
    pub name: String,
    /// Address with prefix length, e.g. `192.168.42.1/24`.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub addr: Option<IpPrefix>,
}

/// A declared bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeDetails {
    /// Bridge name, e.g. `br0` or `lan0`.
    pub name: String,
    /// Hardware addresses of the member links.
    #[serde(default)]
    pub interface_hardware_addrs: Vec<MacAddress>,
}

/// Contents of `interfaces.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Declared interfaces.
    #[serde(default)]
    pub interfaces: Vec<InterfaceDetails>,
    /// Declared bridges.
    #[serde(default)]
    pub bridges: Vec<BridgeDetails>,
}

impl InterfaceConfig {
    /// Reads `interfaces.json` from `dir`. Returns `Ok(None)` if the file
    /// does not exist.
    pub async fn load(dir: &Path) -> CfgMgrResult<Option<Self>> {
        read_json(&dir.join(INTERFACES_FILE)).await
    }

    /// Returns the details declared for interface `ifname`.
    pub fn interface(&self, ifname: &str) -> CfgMgrResult<&InterfaceDetails> {
        self.interfaces
            .iter()
            .find(|details| details.name == ifname)
            .ok_or_else(|| {
                CfgMgrError::invalid_config(
                    INTERFACES_FILE,
                    format!("does not configure interface {:?}", ifname),
                )
            })
    }

    /// Returns the host address declared for interface `ifname`.
    pub fn link_address(&self, ifname: &str) -> CfgMgrResult<IpAddr> {
        self.interface(ifname)?
            .addr
            .map(|prefix| prefix.address())
            .ok_or_else(|| {
                CfgMgrError::invalid_config(
                    INTERFACES_FILE,
                    format!("interface {:?} has no address", ifname),
                )
            })
    }
}

/// A declared port forwarding from the uplink to a LAN host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForwarding {
    /// `tcp`, `udp`, `tcp,udp`, or empty for `tcp`.
    #[serde(default)]
    pub proto: String,
    /// Port or range on the uplink, e.g. `8080` or `8080-8090`.
    pub port: String,
    /// LAN host, e.g. `192.168.42.2`.
    pub dest_addr: String,
    /// Port or range on the LAN host, e.g. `80` or `80-90`.
    pub dest_port: String,
}

/// Contents of `portforwardings.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForwardings {
    /// Declared forwardings, compiled in order.
    #[serde(default)]
    pub forwardings: Vec<PortForwarding>,
}

impl PortForwardings {
    /// Reads `portforwardings.json` from `dir`. A missing file yields no
    /// forwardings.
    pub async fn load(dir: &Path) -> CfgMgrResult<Self> {
        Ok(read_json(&dir.join(PORT_FORWARDINGS_FILE))
            .await?
            .unwrap_or_default())
    }
}

/// Reads and decodes a JSON file, mapping "not found" to `Ok(None)`.
pub(crate) async fn read_json<T>(path: &Path) -> CfgMgrResult<Option<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let content = match tokio::fs::read(path)
        .await
        .map_err(|e| CfgMgrError::io("read", path, e))
    {
        Ok(content) => content,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|e| CfgMgrError::json(path, e))
}

fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    if s.is_empty() {
        return Ok(None);
    }
    s.parse().map(Some).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const INTERFACES_JSON: &str = r#"{
        "interfaces": [
            {
                "hardware_addr": "02:73:53:00:ca:fe",
                "name": "uplink0"
            },
            {
                "hardware_addr": "02:73:53:00:b0:0c",
                "spoof_hardware_addr": "",
                "name": "lan0",
                "addr": "192.168.42.1/24"
            }
        ],
        "bridges": [
            {"name": "lan0", "interface_hardware_addrs": ["02:73:53:00:b0:0c", "02:73:53:00:b0:0d"]}
        ]
    }"#;

    #[test]
    fn test_decode_interfaces() {
        let cfg: InterfaceConfig = serde_json::from_str(INTERFACES_JSON).unwrap();
        assert_eq!(cfg.interfaces.len(), 2);
        assert_eq!(cfg.interfaces[0].addr, None);
        assert_eq!(cfg.interfaces[1].spoof_hardware_addr, None);
        assert_eq!(
            cfg.interfaces[1].addr,
            Some("192.168.42.1/24".parse().unwrap())
        );
        assert_eq!(cfg.bridges[0].interface_hardware_addrs.len(), 2);
    }

    #[test]
    fn test_decode_rejects_bad_mac() {
        let json = r#"{"interfaces": [{"hardware_addr": "not-a-mac", "name": "lan0"}]}"#;
        assert!(serde_json::from_str::<InterfaceConfig>(json).is_err());
    }

    #[test]
    fn test_interface_lookup() {
        let cfg: InterfaceConfig = serde_json::from_str(INTERFACES_JSON).unwrap();
        assert_eq!(cfg.interface("uplink0").unwrap().name, "uplink0");
        assert_eq!(
            cfg.link_address("lan0").unwrap(),
            "192.168.42.1".parse::<IpAddr>().unwrap()
        );

        let err = cfg.interface("wg0").unwrap_err();
        assert!(err.to_string().contains("does not configure interface \"wg0\""));
        assert!(cfg.link_address("uplink0").is_err());
    }

    #[tokio::test]
    async fn test_load_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(InterfaceConfig::load(dir.path()).await.unwrap(), None);
        assert!(PortForwardings::load(dir.path())
            .await
            .unwrap()
            .forwardings
            .is_empty());
    }

    #[tokio::test]
    async fn test_load_port_forwardings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PORT_FORWARDINGS_FILE),
            r#"{"forwardings": [{"proto": "tcp,udp", "port": "8080-8090", "dest_addr": "192.168.42.2", "dest_port": "80-90"}]}"#,
        )
        .unwrap();

        let fws = PortForwardings::load(dir.path()).await.unwrap();
        assert_eq!(
            fws.forwardings,
            vec![PortForwarding {
                proto: "tcp,udp".to_string(),
                port: "8080-8090".to_string(),
                dest_addr: "192.168.42.2".to_string(),
                dest_port: "80-90".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_load_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INTERFACES_FILE), "{").unwrap();
        let err = InterfaceConfig::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, CfgMgrError::Json { .. }));
    }
}
