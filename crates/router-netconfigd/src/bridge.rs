//! Bridge creation and membership

use std::collections::HashSet;
use tracing::{info, instrument};

use router_cfgmgr_common::{CfgMgrError, CfgMgrResult};
use router_types::MacAddress;

use crate::kernel::NetControl;
use crate::types::BridgeDetails;

/// Creates missing bridges and enslaves their member links.
///
/// Members are selected by hardware address. A bridge takes the hardware
/// address of its first member, so the bridge itself is skipped when it
/// matches.
#[instrument(skip_all, fields(bridges = bridges.len()))]
pub async fn ensure_bridges(kernel: &dyn NetControl, bridges: &[BridgeDetails]) -> CfgMgrResult<()> {
    for bridge in bridges {
        ensure_bridge(kernel, bridge).await?;
    }
    Ok(())
}

async fn ensure_bridge(kernel: &dyn NetControl, bridge: &BridgeDetails) -> CfgMgrResult<()> {
    let name = bridge.name.as_str();

    if !kernel.links().await?.iter().any(|l| l.name == name) {
        info!("Creating bridge {}", name);
        kernel
            .add_bridge(name)
            .await
            .map_err(|e| CfgMgrError::link_step("create", name, e))?;
    }

    let members: HashSet<MacAddress> = bridge.interface_hardware_addrs.iter().copied().collect();

    let links = kernel.links().await?;
    let bridge_link = links
        .iter()
        .find(|l| l.name == name)
        .ok_or_else(|| CfgMgrError::link_not_found(name))?;

    for link in &links {
        let Some(mac) = link.mac else { continue };
        if !members.contains(&mac) || link.name == name {
            continue;
        }

        if link.master.as_deref() != Some(name) {
            info!("Adding interface {} to bridge {}", link.name, name);
            kernel
                .set_master(&link.name, name)
                .await
                .map_err(|e| CfgMgrError::link_step("enslave", link.name.as_str(), e))?;
        }
        if !link.is_up() {
            info!("Setting interface {} up", link.name);
            kernel
                .set_up(&link.name)
                .await
                .map_err(|e| CfgMgrError::link_step("up", link.name.as_str(), e))?;
        }
    }

    if !bridge_link.is_up() {
        info!("Setting bridge {} up", name);
        kernel
            .set_up(name)
            .await
            .map_err(|e| CfgMgrError::link_step("up", name, e))?;
    }
    Ok(())
}
