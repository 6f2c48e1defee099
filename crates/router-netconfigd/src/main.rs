//! netconfigd - Network Configuration Daemon
//!
//! Applies the declared network configuration at startup and again on every
//! SIGUSR1, notifying dependent daemons after each pass.

use anyhow::{anyhow, Context};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use router_cfgmgr_common::{IpcSignal, ProcessNotifier, ProcfsNotifier};
use router_netconfigd::config_file::DEFAULT_CONFIG_PATH;
use router_netconfigd::{IpControl, NetConfig, NetconfigdConfig, NftControl, SysctlApplier};

#[derive(Debug, Parser)]
#[command(name = "netconfigd", version, about = "Router network configuration daemon")]
struct Args {
    /// Daemon configuration file; defaults apply if it does not exist
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Apply once and exit; the exit status reflects the pass
    #[arg(long)]
    once: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Initializes tracing/logging subsystem
fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level {:?}", level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("failed to set tracing subscriber: {}", e))
}

/// Runs one pass and notifies the dependent daemons. Returns true if the
/// pass succeeded.
async fn run_pass(
    netconfig: &NetConfig,
    config: &NetconfigdConfig,
    notifier: &dyn ProcessNotifier,
) -> bool {
    let result = netconfig
        .apply(&config.paths.config_dir, &config.paths.root_dir)
        .await;

    // Addresses may have changed even if the pass failed.
    if let Err(e) = notifier
        .notify(&config.notify.reload_process, IpcSignal::Usr1)
        .await
    {
        warn!(process = %config.notify.reload_process, error = %e, "notify failed");
    }
    notifier
        .notify_all(&config.notify.broadcast, IpcSignal::Hup)
        .await;

    match result {
        Ok(()) => true,
        Err(e) => {
            error!(
                error = %e,
                failed_stages = ?e.failed_stages(),
                retryable = e.is_retryable(),
                "Pass failed"
            );
            false
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = NetconfigdConfig::load_or_default(&args.config)?;
    config.validate()?;

    let notifier = Arc::new(ProcfsNotifier::new(&config.paths.proc_dir));
    let netconfig = NetConfig::new(
        Arc::new(IpControl::new()),
        Arc::new(NftControl::new()),
        notifier.clone(),
    )
    .with_sysctl(SysctlApplier::new(&config.paths.proc_sys_dir))
    .with_settings(config.settings());

    if args.once {
        let ok = run_pass(&netconfig, &config, notifier.as_ref()).await;
        return Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    // Installed before the first pass so a trigger during it is not lost.
    let mut reload = signal(SignalKind::user_defined1()).context("SIGUSR1 handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("SIGTERM handler")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("SIGINT handler")?;

    loop {
        run_pass(&netconfig, &config, notifier.as_ref()).await;

        tokio::select! {
            Some(()) = reload.recv() => info!("SIGUSR1 received, reapplying"),
            _ = terminate.recv() => {
                info!("SIGTERM received");
                break;
            }
            _ = interrupt.recv() => {
                info!("SIGINT received");
                break;
            }
        }
    }

    info!("netconfigd exiting");
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("netconfigd: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!(config = %args.config.display(), "--- Starting netconfigd ---");

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("netconfigd: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
