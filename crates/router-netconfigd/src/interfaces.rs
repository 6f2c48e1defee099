//! Interface reconciliation: names, hardware addresses, link state and
//! addresses of declared interfaces.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, info, instrument};

use router_cfgmgr_common::{CfgMgrError, CfgMgrResult};
use router_types::MacAddress;

use crate::bridge::ensure_bridges;
use crate::files::RESOLV_CONF_FILE;
use crate::kernel::{Link, NetControl};
use crate::types::{InterfaceConfig, InterfaceDetails};

/// Declared interfaces indexed the way live links are matched against them.
struct InterfaceIndex<'a> {
    by_mac: HashMap<MacAddress, &'a InterfaceDetails>,
    by_name: HashMap<&'a str, &'a InterfaceDetails>,
}

impl<'a> InterfaceIndex<'a> {
    fn new(interfaces: &'a [InterfaceDetails]) -> Self {
        let mut by_mac = HashMap::new();
        let mut by_name = HashMap::new();
        for details in interfaces {
            if let Some(mac) = details.hardware_addr {
                by_mac.insert(mac, details);
            }
            // A spoofed link must still be found on the next pass.
            if let Some(spoof) = details.spoof_hardware_addr {
                by_mac.insert(spoof, details);
            }
            by_name.insert(details.name.as_str(), details);
        }
        Self { by_mac, by_name }
    }

    fn lookup(&self, link: &Link) -> Option<&'a InterfaceDetails> {
        link.mac
            .and_then(|mac| self.by_mac.get(&mac).copied())
            .or_else(|| self.by_name.get(link.name.as_str()).copied())
    }
}

/// Brings live links in line with `interfaces.json` in `config_dir`.
///
/// Bridges are ensured first. Every live link matching a declared interface
/// is renamed, spoofed, set up and addressed, in that order. For the `lan`
/// interface, `<root>/tmp/resolv.conf` is rewritten to point at its address.
/// A missing `interfaces.json` is not an error.
#[instrument(skip(kernel))]
pub async fn apply_interfaces(
    kernel: &dyn NetControl,
    config_dir: &Path,
    root: &Path,
    lan: &str,
) -> CfgMgrResult<()> {
    let Some(cfg) = InterfaceConfig::load(config_dir).await? else {
        debug!("No interfaces configured");
        return Ok(());
    };

    ensure_bridges(kernel, &cfg.bridges).await?;

    let index = InterfaceIndex::new(&cfg.interfaces);
    for link in kernel.links().await? {
        let Some(details) = index.lookup(&link) else {
            debug!(
                "No config for interface {}/{}",
                link.name,
                link.mac.map(|m| m.to_string()).unwrap_or_default()
            );
            continue;
        };
        apply_details(kernel, &link, details, root, lan).await?;
    }
    Ok(())
}

async fn apply_details(
    kernel: &dyn NetControl,
    link: &Link,
    details: &InterfaceDetails,
    root: &Path,
    lan: &str,
) -> CfgMgrResult<()> {
    debug!("Applying {:?} to {}", details, link.name);
    let name = details.name.as_str();

    if link.name != name {
        info!("Renaming {} to {}", link.name, name);
        kernel
            .set_name(&link.name, name)
            .await
            .map_err(|e| CfgMgrError::link_step("rename", link.name.as_str(), e))?;
    }

    if let Some(spoof) = details.spoof_hardware_addr.filter(|m| link.mac != Some(*m)) {
        kernel
            .set_hardware_addr(name, spoof)
            .await
            .map_err(|e| CfgMgrError::link_step("spoof", name, e))?;
    }

    if !link.is_up() {
        kernel
            .set_up(name)
            .await
            .map_err(|e| CfgMgrError::link_step("up", name, e))?;
    }

    if let Some(addr) = details.addr {
        kernel
            .replace_address(name, addr)
            .await
            .map_err(|e| CfgMgrError::link_step("address", name, e))?;

        if name == lan {
            write_resolv_conf(root, addr.address())
                .map_err(|e| CfgMgrError::link_step("resolv.conf", name, e))?;
        }
    }
    Ok(())
}

/// Points the local resolver configuration at `nameserver`.
///
/// The old file is removed first, so a symlink left in its place is
/// replaced rather than followed. The new content is renamed into place.
pub fn write_resolv_conf(root: &Path, nameserver: IpAddr) -> CfgMgrResult<()> {
    let path = root.join(RESOLV_CONF_FILE);
    let dir = path
        .parent()
        .ok_or_else(|| CfgMgrError::internal(format!("{} has no parent", path.display())))?;

    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(CfgMgrError::io("remove", &path, e)),
    }

    fs::create_dir_all(dir).map_err(|e| CfgMgrError::io("create", dir, e))?;
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| CfgMgrError::io("create", dir, e))?;
    tmp.write_all(format!("nameserver {}\n", nameserver).as_bytes())
        .map_err(|e| CfgMgrError::io("write", tmp.path(), e))?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(0o644))
        .map_err(|e| CfgMgrError::io("chmod", tmp.path(), e))?;
    tmp.persist(&path)
        .map_err(|e| CfgMgrError::io("rename", &path, e.error))?;
    Ok(())
}
