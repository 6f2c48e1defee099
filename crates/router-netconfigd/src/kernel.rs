//! Control-plane capability for links, addresses and routes.
//!
//! Reconciliation code only talks to [`NetControl`]; the production
//! implementation lives in [`crate::ip_control`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use router_cfgmgr_common::{CfgMgrError, CfgMgrResult};
use router_types::{AddressFamily, IpPrefix, MacAddress};

/// Operational state of a link as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperState {
    /// Link is up.
    Up,
    /// Link is down.
    Down,
    /// State not reported by the driver (e.g. loopback, bridges without ports).
    Unknown,
}

impl OperState {
    /// Parses the `operstate` string used by `ip` and sysfs.
    pub fn from_kernel(s: &str) -> Self {
        match s {
            "UP" | "up" => OperState::Up,
            "DOWN" | "down" | "LOWERLAYERDOWN" | "lowerlayerdown" => OperState::Down,
            _ => OperState::Unknown,
        }
    }
}

/// A network link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Kernel interface index.
    pub index: u32,
    /// Interface name.
    pub name: String,
    /// Hardware address, if the link has an Ethernet one.
    pub mac: Option<MacAddress>,
    /// Operational state.
    pub oper_state: OperState,
    /// Name of the bridge (or other master) this link is enslaved to.
    pub master: Option<String>,
}

impl Link {
    /// Returns true if the link is operationally up.
    pub fn is_up(&self) -> bool {
        self.oper_state == OperState::Up
    }
}

/// Route scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteScope {
    /// Valid everywhere.
    Universe,
    /// Valid on the directly attached link only.
    Link,
    /// Valid on this host only.
    Host,
}

impl fmt::Display for RouteScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RouteScope::Universe => "global",
            RouteScope::Link => "link",
            RouteScope::Host => "host",
        })
    }
}

/// Origin of a route (`rtm_protocol`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteProtocol {
    /// Installed by an administrator (`RTPROT_STATIC`).
    Static,
    /// Installed by a DHCP client (`RTPROT_DHCP`).
    Dhcp,
}

impl fmt::Display for RouteProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RouteProtocol::Static => "static",
            RouteProtocol::Dhcp => "dhcp",
        })
    }
}

/// A unicast route bound to a link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    /// Outgoing link.
    pub dev: String,
    /// Destination network.
    pub destination: IpPrefix,
    /// Next hop, if not directly connected.
    pub gateway: Option<IpAddr>,
    /// Preferred source address.
    pub source: Option<IpAddr>,
    /// Scope.
    pub scope: RouteScope,
    /// Origin.
    pub protocol: RouteProtocol,
}

/// Operations on the kernel's link, address and route tables.
///
/// Links are addressed by name; after a rename, callers must use the new
/// name.
#[async_trait]
pub trait NetControl: Send + Sync {
    /// Returns all links.
    async fn links(&self) -> CfgMgrResult<Vec<Link>>;

    /// Creates a bridge device.
    async fn add_bridge(&self, name: &str) -> CfgMgrResult<()>;

    /// Renames a link.
    async fn set_name(&self, link: &str, new_name: &str) -> CfgMgrResult<()>;

    /// Overrides a link's hardware address.
    async fn set_hardware_addr(&self, link: &str, mac: MacAddress) -> CfgMgrResult<()>;

    /// Enslaves a link to a bridge.
    async fn set_master(&self, link: &str, master: &str) -> CfgMgrResult<()>;

    /// Sets a link administratively up.
    async fn set_up(&self, link: &str) -> CfgMgrResult<()>;

    /// Returns the addresses of one family configured on a link.
    async fn addresses(&self, link: &str, family: AddressFamily) -> CfgMgrResult<Vec<IpPrefix>>;

    /// Adds an address, or updates it if already present.
    async fn replace_address(&self, link: &str, address: IpPrefix) -> CfgMgrResult<()>;

    /// Removes an address.
    async fn delete_address(&self, link: &str, address: IpPrefix) -> CfgMgrResult<()>;

    /// Adds a route, or replaces the route with the same destination.
    async fn replace_route(&self, route: &Route) -> CfgMgrResult<()>;

    /// Looks up a single link by name.
    async fn link_by_name(&self, name: &str) -> CfgMgrResult<Link> {
        self.links()
            .await?
            .into_iter()
            .find(|link| link.name == name)
            .ok_or_else(|| CfgMgrError::link_not_found(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oper_state_from_kernel() {
        assert_eq!(OperState::from_kernel("UP"), OperState::Up);
        assert_eq!(OperState::from_kernel("DOWN"), OperState::Down);
        assert_eq!(OperState::from_kernel("LOWERLAYERDOWN"), OperState::Down);
        assert_eq!(OperState::from_kernel("UNKNOWN"), OperState::Unknown);
        assert_eq!(OperState::from_kernel("DORMANT"), OperState::Unknown);
    }

    #[test]
    fn test_route_labels() {
        assert_eq!(RouteScope::Link.to_string(), "link");
        assert_eq!(RouteScope::Universe.to_string(), "global");
        assert_eq!(RouteProtocol::Dhcp.to_string(), "dhcp");
    }
}
