//! Test fixtures for netconfigd
//!
//! [`TestEnv`] lays out a throwaway config directory, root directory and
//! proc-sys tree; the fixture modules build the declared documents that go
//! into it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use router_cfgmgr_common::ProcessNotifier;
use router_netconfigd::files::{
    DHCP4_LEASE_FILE, DHCP6_LEASE_FILE, INTERFACES_FILE, PORT_FORWARDINGS_FILE, RESOLV_CONF_FILE,
};
use router_netconfigd::nft::PacketFilter;
use router_netconfigd::{
    InterfaceConfig, NetConfig, NetControl, PortForwarding, PortForwardings, SysctlApplier,
};
use router_types::{Dhcp4Lease, Dhcp6Lease};

/// Temporary directories a reconciliation pass reads and writes.
pub struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    /// Creates empty config and root directories and a proc-sys tree with
    /// the global forwarding knobs.
    pub fn new() -> io::Result<Self> {
        let env = Self {
            dir: tempfile::tempdir()?,
        };
        fs::create_dir_all(env.config_dir())?;
        fs::create_dir_all(env.root_dir())?;
        fs::create_dir_all(env.proc_sys_dir().join("net/ipv4"))?;
        fs::create_dir_all(env.proc_sys_dir().join("net/ipv6/conf/all"))?;
        Ok(env)
    }

    /// Directory holding interfaces.json and friends.
    pub fn config_dir(&self) -> PathBuf {
        self.dir.path().join("perm")
    }

    /// Root directory (tmp/resolv.conf lives below it).
    pub fn root_dir(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    /// Stand-in for /proc/sys.
    pub fn proc_sys_dir(&self) -> PathBuf {
        self.dir.path().join("proc/sys")
    }

    /// Creates `net/ipv6/conf/<ifname>` so per-link sysctls can be written.
    pub fn with_sysctl_link(self, ifname: &str) -> io::Result<Self> {
        fs::create_dir_all(self.proc_sys_dir().join("net/ipv6/conf").join(ifname))?;
        Ok(self)
    }

    /// Writes `contents` to `rel` below the config directory.
    pub fn write_raw(&self, rel: &str, contents: &str) -> io::Result<()> {
        let path = self.config_dir().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    }

    fn write_json(&self, rel: &str, json: serde_json::Result<String>) -> io::Result<()> {
        self.write_raw(rel, &json.map_err(io::Error::other)?)
    }

    /// Writes interfaces.json.
    pub fn write_interfaces(&self, cfg: &InterfaceConfig) -> io::Result<()> {
        self.write_json(INTERFACES_FILE, serde_json::to_string_pretty(cfg))
    }

    /// Writes portforwardings.json.
    pub fn write_forwardings(&self, forwardings: &[PortForwarding]) -> io::Result<()> {
        let doc = PortForwardings {
            forwardings: forwardings.to_vec(),
        };
        self.write_json(PORT_FORWARDINGS_FILE, serde_json::to_string_pretty(&doc))
    }

    /// Writes the DHCPv4 lease.
    pub fn write_dhcp4_lease(&self, lease: &Dhcp4Lease) -> io::Result<()> {
        self.write_json(DHCP4_LEASE_FILE, serde_json::to_string_pretty(lease))
    }

    /// Writes the DHCPv6 lease.
    pub fn write_dhcp6_lease(&self, lease: &Dhcp6Lease) -> io::Result<()> {
        self.write_json(DHCP6_LEASE_FILE, serde_json::to_string_pretty(lease))
    }

    /// Reads a sysctl written during a pass, e.g. `net/ipv4/ip_forward`.
    pub fn read_sysctl(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.proc_sys_dir().join(rel)).ok()
    }

    /// Reads `<root>/tmp/resolv.conf`.
    pub fn resolv_conf(&self) -> Option<String> {
        fs::read_to_string(self.root_dir().join(RESOLV_CONF_FILE)).ok()
    }

    /// Returns the path of a file below the config directory.
    pub fn config_path(&self, rel: &str) -> PathBuf {
        self.config_dir().join(rel)
    }

    /// Builds an orchestrator writing sysctls into this environment.
    pub fn netconfig(
        &self,
        kernel: Arc<dyn NetControl>,
        filter: Arc<dyn PacketFilter>,
        notifier: Arc<dyn ProcessNotifier>,
    ) -> NetConfig {
        NetConfig::new(kernel, filter, notifier)
            .with_sysctl(SysctlApplier::new(self.proc_sys_dir()))
    }

    /// Root of the temporary tree.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Declared interfaces and bridges
pub mod interface_fixtures {
    use router_netconfigd::{BridgeDetails, InterfaceDetails};

    /// An interface matched by hardware address.
    pub fn interface(mac: &str, name: &str, addr: Option<&str>) -> InterfaceDetails {
        InterfaceDetails {
            hardware_addr: mac.parse().ok(),
            spoof_hardware_addr: None,
            name: name.to_string(),
            addr: addr.and_then(|a| a.parse().ok()),
        }
    }

    /// An interface matched by name only.
    pub fn named_interface(name: &str, addr: &str) -> InterfaceDetails {
        InterfaceDetails {
            name: name.to_string(),
            addr: addr.parse().ok(),
            ..Default::default()
        }
    }

    /// A bridge over the links with the given hardware addresses.
    pub fn bridge(name: &str, member_macs: &[&str]) -> BridgeDetails {
        BridgeDetails {
            name: name.to_string(),
            interface_hardware_addrs: member_macs.iter().filter_map(|m| m.parse().ok()).collect(),
        }
    }
}

/// DHCP lease artifacts
pub mod lease_fixtures {
    use router_types::{Dhcp4Lease, Dhcp6Lease};

    /// A DHCPv4 lease without DNS servers.
    pub fn dhcp4(client_ip: &str, subnet_mask: &str, router: &str) -> Dhcp4Lease {
        Dhcp4Lease {
            renew_after: None,
            client_ip: client_ip.to_string(),
            subnet_mask: subnet_mask.to_string(),
            router: router.to_string(),
            dns: Vec::new(),
        }
    }

    /// A DHCPv6 lease delegating `prefixes` (CIDR notation).
    pub fn dhcp6(prefixes: &[&str]) -> Dhcp6Lease {
        Dhcp6Lease {
            renew_after: None,
            prefixes: prefixes.iter().filter_map(|p| p.parse().ok()).collect(),
            dns: Vec::new(),
        }
    }
}

/// Port forwardings
pub mod forwarding_fixtures {
    use router_netconfigd::PortForwarding;

    /// Forwards `port` on the uplink to `dest_addr:dest_port`.
    pub fn forwarding(proto: &str, port: &str, dest_addr: &str, dest_port: &str) -> PortForwarding {
        PortForwarding {
            proto: proto.to_string(),
            port: port.to_string(),
            dest_addr: dest_addr.to_string(),
            dest_port: dest_port.to_string(),
        }
    }
}
