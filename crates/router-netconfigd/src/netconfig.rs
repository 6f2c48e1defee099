//! One reconciliation pass over interfaces, leases, sysctls and the packet
//! filter.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use router_cfgmgr_common::{CfgMgrError, CfgMgrResult, IpcSignal, ProcessNotifier};

use crate::files::{DEFAULT_LAN, DEFAULT_NOTIFY_PROCESSES, DEFAULT_UPLINK, DEFAULT_UPLINK_CANDIDATES};
use crate::interfaces::apply_interfaces;
use crate::kernel::NetControl;
use crate::lease::{apply_dhcp4_lease, apply_dhcp6_lease};
use crate::nft::{compile_firewall, PacketFilter};
use crate::sysctl::SysctlApplier;

/// Stages whose failure does not stop the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// DHCPv4 lease installation.
    Dhcp4,
    /// DHCPv6 prefix installation.
    Dhcp6,
    /// Kernel parameters.
    Sysctl,
    /// Packet filter ruleset.
    Firewall,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Dhcp4 => "dhcp4",
            Stage::Dhcp6 => "dhcp6",
            Stage::Sysctl => "sysctl",
            Stage::Firewall => "firewall",
        })
    }
}

/// A stage that failed, and why.
#[derive(Debug)]
pub struct StageFailure {
    /// Failed stage.
    pub stage: Stage,
    /// Cause.
    pub error: CfgMgrError,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.error)
    }
}

fn join_failures(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of a failed pass.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Interface reconciliation failed; nothing after it ran.
    #[error("interfaces: {0}")]
    Interfaces(#[source] CfgMgrError),

    /// The listed stages failed; every other stage ran.
    #[error("{}", join_failures(.0))]
    Stages(Vec<StageFailure>),
}

impl ApplyError {
    /// Returns the failed independent stages, in the order they ran.
    pub fn failed_stages(&self) -> Vec<Stage> {
        match self {
            ApplyError::Interfaces(_) => Vec::new(),
            ApplyError::Stages(failures) => failures.iter().map(|f| f.stage).collect(),
        }
    }

    /// Returns true if every failure may clear up on a later pass without a
    /// configuration change.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApplyError::Interfaces(e) => e.is_retryable(),
            ApplyError::Stages(failures) => failures.iter().all(|f| f.error.is_retryable()),
        }
    }
}

/// Interface names and processes a pass works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetConfigSettings {
    /// Interface the DHCPv4 lease is installed on.
    pub uplink: String,
    /// Interface receiving the DHCPv6 prefix and publishing the resolver.
    pub lan: String,
    /// Names probed in order to pick the uplink for sysctls and the firewall.
    pub uplink_candidates: Vec<String>,
    /// Processes sent SIGUSR1 once addresses are in place.
    pub notify_processes: Vec<String>,
}

impl Default for NetConfigSettings {
    fn default() -> Self {
        Self {
            uplink: DEFAULT_UPLINK.to_string(),
            lan: DEFAULT_LAN.to_string(),
            uplink_candidates: DEFAULT_UPLINK_CANDIDATES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            notify_processes: DEFAULT_NOTIFY_PROCESSES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Applies declared network configuration to the running system.
pub struct NetConfig {
    kernel: Arc<dyn NetControl>,
    filter: Arc<dyn PacketFilter>,
    notifier: Arc<dyn ProcessNotifier>,
    sysctl: SysctlApplier,
    settings: NetConfigSettings,
}

impl NetConfig {
    /// Creates an orchestrator with default settings, writing sysctls below
    /// `/proc/sys`.
    pub fn new(
        kernel: Arc<dyn NetControl>,
        filter: Arc<dyn PacketFilter>,
        notifier: Arc<dyn ProcessNotifier>,
    ) -> Self {
        Self {
            kernel,
            filter,
            notifier,
            sysctl: SysctlApplier::default(),
            settings: NetConfigSettings::default(),
        }
    }

    /// Replaces the sysctl applier.
    pub fn with_sysctl(mut self, sysctl: SysctlApplier) -> Self {
        self.sysctl = sysctl;
        self
    }

    /// Replaces the settings.
    pub fn with_settings(mut self, settings: NetConfigSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns the settings.
    pub fn settings(&self) -> &NetConfigSettings {
        &self.settings
    }

    /// Picks the first candidate that exists as a live link.
    ///
    /// Returns `None` if no candidate exists or links cannot be listed; the
    /// uplink-scoped settings are then skipped.
    pub async fn resolve_uplink(&self) -> Option<String> {
        let links = match self.kernel.links().await {
            Ok(links) => links,
            Err(e) => {
                warn!(error = %e, "Cannot list links to find the uplink");
                return None;
            }
        };
        let found = self
            .settings
            .uplink_candidates
            .iter()
            .find(|candidate| links.iter().any(|l| &l.name == *candidate))
            .cloned();
        if found.is_none() {
            warn!(
                candidates = ?self.settings.uplink_candidates,
                "No uplink interface found"
            );
        }
        found
    }

    /// Runs one pass.
    ///
    /// Interface reconciliation runs first and its failure ends the pass.
    /// After it, every stage runs regardless of earlier failures and all
    /// failures are returned together.
    #[instrument(skip(self))]
    pub async fn apply(&self, config_dir: &Path, root_dir: &Path) -> Result<(), ApplyError> {
        apply_interfaces(&*self.kernel, config_dir, root_dir, &self.settings.lan)
            .await
            .map_err(|e| {
                error!(error = %e, "Interface reconciliation failed");
                ApplyError::Interfaces(e)
            })?;

        let mut failures = Vec::new();

        record(
            &mut failures,
            Stage::Dhcp4,
            apply_dhcp4_lease(&*self.kernel, config_dir, &self.settings.uplink).await,
        );
        record(
            &mut failures,
            Stage::Dhcp6,
            apply_dhcp6_lease(&*self.kernel, config_dir, &self.settings.lan).await,
        );

        self.notifier
            .notify_all(&self.settings.notify_processes, IpcSignal::Usr1)
            .await;

        let uplink = self.resolve_uplink().await;

        record(
            &mut failures,
            Stage::Sysctl,
            self.sysctl.apply(uplink.as_deref()).await,
        );
        record(
            &mut failures,
            Stage::Firewall,
            compile_firewall(&*self.filter, config_dir, uplink.as_deref()).await,
        );

        if failures.is_empty() {
            info!(uplink = ?uplink, "Network configuration applied");
            Ok(())
        } else {
            Err(ApplyError::Stages(failures))
        }
    }
}

fn record(failures: &mut Vec<StageFailure>, stage: Stage, result: CfgMgrResult<()>) {
    if let Err(error) = result {
        error!(%stage, error = %error, "Stage failed");
        failures.push(StageFailure { stage, error });
    }
}
