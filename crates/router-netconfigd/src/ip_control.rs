//! [`NetControl`] backed by the `ip` command.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use router_cfgmgr_common::{shell, CfgMgrError, CfgMgrResult};
use router_types::{AddressFamily, IpPrefix, MacAddress};

use crate::commands::{
    build_add_bridge_cmd, build_address_cmd, build_replace_route_cmd, build_set_hardware_addr_cmd,
    build_set_master_cmd, build_set_name_cmd, build_set_up_cmd, build_show_addresses_cmd,
    build_show_links_cmd,
};
use crate::kernel::{Link, NetControl, OperState, Route};

/// One entry of `ip -j link show`.
#[derive(Debug, Deserialize)]
struct IpLink {
    ifindex: u32,
    ifname: String,
    #[serde(default)]
    operstate: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    master: Option<String>,
}

impl From<IpLink> for Link {
    fn from(l: IpLink) -> Self {
        // Tunnels report IP addresses here; those links have no MAC.
        let mac = l
            .address
            .as_deref()
            .and_then(|a| a.parse::<MacAddress>().ok());
        Link {
            index: l.ifindex,
            name: l.ifname,
            mac,
            oper_state: OperState::from_kernel(&l.operstate),
            master: l.master,
        }
    }
}

/// One entry of `ip -j address show`.
#[derive(Debug, Deserialize)]
struct IpAddrEntry {
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    family: String,
    local: String,
    prefixlen: u8,
}

/// Parses the output of `ip -j link show`.
pub fn parse_links(json: &str) -> CfgMgrResult<Vec<Link>> {
    let links: Vec<IpLink> =
        serde_json::from_str(json).map_err(|e| CfgMgrError::json(build_show_links_cmd(), e))?;
    Ok(links.into_iter().map(Link::from).collect())
}

/// Parses the output of `ip -j address show`, keeping one family.
pub fn parse_addresses(json: &str, family: AddressFamily) -> CfgMgrResult<Vec<IpPrefix>> {
    let entries: Vec<IpAddrEntry> =
        serde_json::from_str(json).map_err(|e| CfgMgrError::json("ip -j address show", e))?;

    let wanted = match family {
        AddressFamily::V4 => "inet",
        AddressFamily::V6 => "inet6",
    };
    let mut addresses = Vec::new();
    for info in entries.into_iter().flat_map(|e| e.addr_info) {
        if info.family != wanted {
            continue;
        }
        let address = info.local.parse().map_err(|_| {
            CfgMgrError::Parse(router_types::ParseError::InvalidIpAddress(info.local.clone()))
        })?;
        addresses.push(IpPrefix::new(address, info.prefixlen)?);
    }
    Ok(addresses)
}

/// Drives link, address and route changes through `ip`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpControl;

impl IpControl {
    /// Creates a new `ip`-backed controller.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NetControl for IpControl {
    async fn links(&self) -> CfgMgrResult<Vec<Link>> {
        let output = shell::exec_or_throw(&build_show_links_cmd()).await?;
        parse_links(&output)
    }

    async fn add_bridge(&self, name: &str) -> CfgMgrResult<()> {
        shell::exec_or_throw(&build_add_bridge_cmd(name)).await?;
        info!("Created bridge {}", name);
        Ok(())
    }

    async fn set_name(&self, link: &str, new_name: &str) -> CfgMgrResult<()> {
        shell::exec_or_throw(&build_set_name_cmd(link, new_name)).await?;
        info!("Renamed {} to {}", link, new_name);
        Ok(())
    }

    async fn set_hardware_addr(&self, link: &str, mac: MacAddress) -> CfgMgrResult<()> {
        shell::exec_or_throw(&build_set_hardware_addr_cmd(link, &mac)).await?;
        debug!("Set hardware address {} on {}", mac, link);
        Ok(())
    }

    async fn set_master(&self, link: &str, master: &str) -> CfgMgrResult<()> {
        shell::exec_or_throw(&build_set_master_cmd(link, master)).await?;
        info!("Added {} to bridge {}", link, master);
        Ok(())
    }

    async fn set_up(&self, link: &str) -> CfgMgrResult<()> {
        shell::exec_or_throw(&build_set_up_cmd(link)).await?;
        debug!("Set {} up", link);
        Ok(())
    }

    async fn addresses(&self, link: &str, family: AddressFamily) -> CfgMgrResult<Vec<IpPrefix>> {
        let output = shell::exec_or_throw(&build_show_addresses_cmd(link, family)).await?;
        parse_addresses(&output, family)
    }

    async fn replace_address(&self, link: &str, address: IpPrefix) -> CfgMgrResult<()> {
        shell::exec_or_throw(&build_address_cmd("replace", link, &address)).await?;
        Ok(())
    }

    async fn delete_address(&self, link: &str, address: IpPrefix) -> CfgMgrResult<()> {
        shell::exec_or_throw(&build_address_cmd("del", link, &address)).await?;
        Ok(())
    }

    async fn replace_route(&self, route: &Route) -> CfgMgrResult<()> {
        shell::exec_or_throw(&build_replace_route_cmd(route)).await?;
        Ok(())
    }
}
