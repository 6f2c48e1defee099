//! Configuration file support for netconfigd
//!
//! Loads and validates the daemon configuration from TOML.
//! Default location: /etc/router/netconfigd.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use router_cfgmgr_common::ipc::PROC_DIR;
use router_cfgmgr_common::{CfgMgrError, CfgMgrResult};

use crate::files::{
    DEFAULT_CONFIG_DIR, DEFAULT_LAN, DEFAULT_NOTIFY_PROCESSES, DEFAULT_PROC_SYS_DIR,
    DEFAULT_ROOT_DIR, DEFAULT_UPLINK, DEFAULT_UPLINK_CANDIDATES,
};
use crate::netconfig::NetConfigSettings;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/router/netconfigd.toml";

/// Longest interface name the kernel accepts, excluding the terminator.
const MAX_IFNAME_LEN: usize = 15;

/// Filesystem locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding interfaces.json, portforwardings.json and leases
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Root below which tmp/resolv.conf is written
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Kernel parameter tree
    #[serde(default = "default_proc_sys_dir")]
    pub proc_sys_dir: PathBuf,

    /// procfs, used to find processes to notify
    #[serde(default = "default_proc_dir")]
    pub proc_dir: PathBuf,
}

/// Interface names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfacesConfig {
    /// Interface the DHCPv4 lease is installed on
    #[serde(default = "default_uplink")]
    pub uplink: String,

    /// LAN interface
    #[serde(default = "default_lan")]
    pub lan: String,

    /// Uplink names probed in order for sysctls and the firewall
    #[serde(default = "default_uplink_candidates")]
    pub uplink_candidates: Vec<String>,
}

/// Processes told about configuration changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Sent SIGUSR1 during a pass, once addresses are installed
    #[serde(default = "default_notify_processes")]
    pub processes: Vec<String>,

    /// Sent SIGUSR1 after every pass
    #[serde(default = "default_reload_process")]
    pub reload_process: String,

    /// Sent SIGHUP after every pass
    #[serde(default = "default_broadcast")]
    pub broadcast: Vec<String>,
}

/// Complete netconfigd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetconfigdConfig {
    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Interface names
    #[serde(default)]
    pub interfaces: InterfacesConfig,

    /// Notification targets
    #[serde(default)]
    pub notify: NotifyConfig,
}

// Default functions
fn default_config_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_DIR)
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT_DIR)
}

fn default_proc_sys_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PROC_SYS_DIR)
}

fn default_proc_dir() -> PathBuf {
    PathBuf::from(PROC_DIR)
}

fn default_uplink() -> String {
    DEFAULT_UPLINK.to_string()
}

fn default_lan() -> String {
    DEFAULT_LAN.to_string()
}

fn default_uplink_candidates() -> Vec<String> {
    DEFAULT_UPLINK_CANDIDATES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_notify_processes() -> Vec<String> {
    DEFAULT_NOTIFY_PROCESSES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_reload_process() -> String {
    "dhcp4d".to_string()
}

fn default_broadcast() -> Vec<String> {
    [
        "dhcp4d", "dhcp6", "dnsd", "dyndns", "diagd", "backupd", "captured", "radvd",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// Default implementations
impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            root_dir: default_root_dir(),
            proc_sys_dir: default_proc_sys_dir(),
            proc_dir: default_proc_dir(),
        }
    }
}

impl Default for InterfacesConfig {
    fn default() -> Self {
        Self {
            uplink: default_uplink(),
            lan: default_lan(),
            uplink_candidates: default_uplink_candidates(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            processes: default_notify_processes(),
            reload_process: default_reload_process(),
            broadcast: default_broadcast(),
        }
    }
}

fn validate_ifname(field: &str, name: &str) -> CfgMgrResult<()> {
    if name.is_empty() || name.len() > MAX_IFNAME_LEN {
        return Err(CfgMgrError::invalid_config(
            field,
            format!("{:?} must be 1-{} bytes", name, MAX_IFNAME_LEN),
        ));
    }
    if name.contains(['/', ' ', '\0']) || name == "." || name == ".." {
        return Err(CfgMgrError::invalid_config(
            field,
            format!("{:?} is not a valid interface name", name),
        ));
    }
    Ok(())
}

impl NetconfigdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> CfgMgrResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                CfgMgrError::invalid_config(path.display().to_string(), e.to_string())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(CfgMgrError::io("read config", path, e)),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> CfgMgrResult<()> {
        validate_ifname("interfaces.uplink", &self.interfaces.uplink)?;
        validate_ifname("interfaces.lan", &self.interfaces.lan)?;
        for candidate in &self.interfaces.uplink_candidates {
            validate_ifname("interfaces.uplink_candidates", candidate)?;
        }

        let processes = self
            .notify
            .processes
            .iter()
            .chain(&self.notify.broadcast)
            .chain(std::iter::once(&self.notify.reload_process));
        for process in processes {
            if process.is_empty() || process.contains('/') {
                return Err(CfgMgrError::invalid_config(
                    "notify",
                    format!("{:?} is not a process name", process),
                ));
            }
        }

        Ok(())
    }

    /// Returns the settings for one reconciliation pass.
    pub fn settings(&self) -> NetConfigSettings {
        NetConfigSettings {
            uplink: self.interfaces.uplink.clone(),
            lan: self.interfaces.lan.clone(),
            uplink_candidates: self.interfaces.uplink_candidates.clone(),
            notify_processes: self.notify.processes.clone(),
        }
    }
}
