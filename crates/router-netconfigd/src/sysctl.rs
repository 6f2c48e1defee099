//! Kernel parameters required for routing.

use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use router_cfgmgr_common::{CfgMgrError, CfgMgrResult};

use crate::files::DEFAULT_PROC_SYS_DIR;

/// One kernel parameter assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sysctl {
    components: Vec<String>,
    value: String,
}

impl Sysctl {
    fn new(components: &[&str], value: &str) -> Self {
        Self {
            components: components.iter().map(|c| c.to_string()).collect(),
            value: value.to_string(),
        }
    }

    /// Dotted key, e.g. `net.ipv4.ip_forward`.
    pub fn key(&self) -> String {
        self.components.join(".")
    }

    /// Value to write.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Location below the proc-sys root. Interface names may contain dots,
    /// so components are joined as path segments rather than by replacing
    /// dots in the key.
    pub fn relative_path(&self) -> PathBuf {
        self.components.iter().collect()
    }
}

/// Writes forwarding and router-advertisement settings.
#[derive(Debug, Clone)]
pub struct SysctlApplier {
    proc_sys_dir: PathBuf,
}

impl Default for SysctlApplier {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_SYS_DIR)
    }
}

impl SysctlApplier {
    /// Creates an applier writing below `proc_sys_dir`.
    pub fn new(proc_sys_dir: impl Into<PathBuf>) -> Self {
        Self {
            proc_sys_dir: proc_sys_dir.into(),
        }
    }

    /// Returns the proc-sys root.
    pub fn proc_sys_dir(&self) -> &Path {
        &self.proc_sys_dir
    }

    /// Returns the parameters for a router with the given uplink.
    ///
    /// Forwarding would make the kernel ignore router advertisements, so
    /// the uplink is told to accept them regardless.
    pub fn settings(uplink: Option<&str>) -> Vec<Sysctl> {
        let mut settings = vec![
            Sysctl::new(&["net", "ipv4", "ip_forward"], "1"),
            Sysctl::new(&["net", "ipv6", "conf", "all", "forwarding"], "1"),
        ];
        if let Some(uplink) = uplink {
            settings.push(Sysctl::new(&["net", "ipv6", "conf", uplink, "accept_ra"], "2"));
        }
        settings
    }

    /// Writes all settings, stopping at the first failure.
    #[instrument(skip(self))]
    pub async fn apply(&self, uplink: Option<&str>) -> CfgMgrResult<()> {
        for ctl in Self::settings(uplink) {
            let path = self.proc_sys_dir.join(ctl.relative_path());
            debug!("sysctl {}={}", ctl.key(), ctl.value());
            tokio::fs::write(&path, ctl.value())
                .await
                .map_err(|source| CfgMgrError::Sysctl {
                    key: ctl.key(),
                    value: ctl.value().to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}
