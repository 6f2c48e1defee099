//! Installing addresses and routes from DHCP client leases.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use tracing::{debug, info, instrument};

use router_cfgmgr_common::{CfgMgrError, CfgMgrResult};
use router_types::{subnet_mask_size, AddressFamily, Dhcp4Lease, Dhcp6Lease, IpPrefix};

use crate::files::{DHCP4_LEASE_FILE, DHCP6_LEASE_FILE};
use crate::kernel::{NetControl, Route, RouteProtocol, RouteScope};
use crate::types::read_json;

/// Delegated prefixes wider than this are narrowed to their first subnet.
const LAN_PREFIX_LEN: u8 = 64;

/// Installs the DHCPv4 lease from `config_dir` on `uplink`.
///
/// The leased address replaces every other IPv4 address on the link. A host
/// route to the gateway and a default route through it are installed with
/// the leased address as source. A missing lease is not an error: the client
/// might not have obtained one yet.
#[instrument(skip(kernel))]
pub async fn apply_dhcp4_lease(
    kernel: &dyn NetControl,
    config_dir: &Path,
    uplink: &str,
) -> CfgMgrResult<()> {
    let Some(lease) = read_json::<Dhcp4Lease>(&config_dir.join(DHCP4_LEASE_FILE)).await? else {
        debug!("No DHCPv4 lease yet");
        return Ok(());
    };

    kernel.link_by_name(uplink).await?;

    if lease.subnet_mask.is_empty() {
        return Err(CfgMgrError::invalid_lease("no subnet mask present"));
    }
    let prefix_len = subnet_mask_size(&lease.subnet_mask)?;

    let client_ip: Ipv4Addr = lease.client_ip.parse().map_err(|_| {
        CfgMgrError::invalid_lease(format!("malformed client_ip {:?}", lease.client_ip))
    })?;
    let router: Ipv4Addr = lease
        .router
        .parse()
        .map_err(|_| CfgMgrError::invalid_lease(format!("malformed router {:?}", lease.router)))?;

    let address = IpPrefix::new(IpAddr::V4(client_ip), prefix_len)?;
    info!("Replacing address {} on {}", address, uplink);
    kernel.replace_address(uplink, address).await?;

    for stale in kernel.addresses(uplink, AddressFamily::V4).await? {
        if stale == address {
            continue;
        }
        info!("De-configuring old IP address {} from {}", stale, uplink);
        kernel.delete_address(uplink, stale).await?;
    }

    let gateway = IpAddr::V4(router);
    let source = Some(IpAddr::V4(client_ip));
    kernel
        .replace_route(&Route {
            dev: uplink.to_string(),
            destination: IpPrefix::host(gateway),
            gateway: None,
            source,
            scope: RouteScope::Link,
            protocol: RouteProtocol::Dhcp,
        })
        .await
        .map_err(|e| CfgMgrError::link_step("route(router)", uplink, e))?;

    kernel
        .replace_route(&Route {
            dev: uplink.to_string(),
            destination: IpPrefix::default_route(AddressFamily::V4),
            gateway: Some(gateway),
            source,
            scope: RouteScope::Universe,
            protocol: RouteProtocol::Dhcp,
        })
        .await
        .map_err(|e| CfgMgrError::link_step("route(default)", uplink, e))?;

    Ok(())
}

/// Returns the address to configure on the LAN for a delegated prefix: the
/// first host (`::1`) of the first /64.
pub fn lan_address_for_prefix(prefix: &IpPrefix) -> CfgMgrResult<IpPrefix> {
    let address = match prefix.address() {
        IpAddr::V4(v4) => {
            let mut octets = v4.octets();
            octets[3] = 1;
            IpAddr::from(octets)
        }
        IpAddr::V6(v6) => {
            let mut octets = v6.octets();
            octets[15] = 1;
            IpAddr::from(octets)
        }
    };
    let prefix_len = match prefix.family() {
        AddressFamily::V6 => prefix.prefix_len().max(LAN_PREFIX_LEN),
        AddressFamily::V4 => prefix.prefix_len(),
    };
    Ok(IpPrefix::new(address, prefix_len)?)
}

/// Installs an address from every delegated prefix of the DHCPv6 lease in
/// `config_dir` on `lan`. A missing lease is not an error.
#[instrument(skip(kernel))]
pub async fn apply_dhcp6_lease(
    kernel: &dyn NetControl,
    config_dir: &Path,
    lan: &str,
) -> CfgMgrResult<()> {
    let Some(lease) = read_json::<Dhcp6Lease>(&config_dir.join(DHCP6_LEASE_FILE)).await? else {
        debug!("No DHCPv6 lease yet");
        return Ok(());
    };

    kernel.link_by_name(lan).await?;

    for prefix in &lease.prefixes {
        let address = lan_address_for_prefix(prefix)?;
        info!("Replacing address {} on {} (prefix {})", address, lan, prefix);
        kernel.replace_address(lan, address).await?;
    }
    Ok(())
}
