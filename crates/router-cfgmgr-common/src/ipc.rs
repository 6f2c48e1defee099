//! Notifying sibling daemons of configuration changes.
//!
//! There is no acknowledgement: a daemon is told to reload by sending it a
//! signal, looked up by process name through procfs.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};

use crate::error::{CfgMgrError, CfgMgrResult};

/// Default procfs mount point.
pub const PROC_DIR: &str = "/proc";

/// Signals understood by the router daemons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpcSignal {
    /// Reopen files and reload everything.
    Hup,
    /// Re-read configuration.
    Usr1,
    /// Daemon specific.
    Usr2,
}

impl IpcSignal {
    /// Returns the matching POSIX signal.
    pub const fn as_signal(&self) -> Signal {
        match self {
            IpcSignal::Hup => Signal::SIGHUP,
            IpcSignal::Usr1 => Signal::SIGUSR1,
            IpcSignal::Usr2 => Signal::SIGUSR2,
        }
    }
}

/// Delivers notifications to other processes.
#[async_trait]
pub trait ProcessNotifier: Send + Sync {
    /// Sends `signal` to every running process named `process`.
    async fn notify(&self, process: &str, signal: IpcSignal) -> CfgMgrResult<()>;

    /// Notifies each process in turn; failures are logged and do not stop
    /// the remaining notifications.
    async fn notify_all(&self, processes: &[String], signal: IpcSignal) {
        for process in processes {
            if let Err(e) = self.notify(process, signal).await {
                tracing::warn!(process = %process, signal = ?signal, error = %e, "notify failed");
            }
        }
    }
}

/// Finds processes through procfs and signals them with `kill(2)`.
#[derive(Debug, Clone)]
pub struct ProcfsNotifier {
    proc_dir: PathBuf,
}

impl Default for ProcfsNotifier {
    fn default() -> Self {
        Self::new(PROC_DIR)
    }
}

impl ProcfsNotifier {
    /// Creates a notifier reading process information below `proc_dir`.
    pub fn new(proc_dir: impl Into<PathBuf>) -> Self {
        Self {
            proc_dir: proc_dir.into(),
        }
    }

    /// Returns the pids of all processes whose name is `process`, sorted.
    ///
    /// A process matches if its `comm` equals the name or if the basename of
    /// its first `cmdline` argument does (`comm` is truncated to 15 bytes).
    pub async fn find_pids(&self, process: &str) -> CfgMgrResult<Vec<i32>> {
        let mut entries = tokio::fs::read_dir(&self.proc_dir)
            .await
            .map_err(|e| CfgMgrError::io("read", &self.proc_dir, e))?;

        let mut pids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CfgMgrError::io("read", &self.proc_dir, e))?
        {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok())
            else {
                continue;
            };
            // Processes may exit while we look at them.
            if process_matches(&entry.path(), process).await {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }
}

async fn process_matches(dir: &Path, process: &str) -> bool {
    if let Ok(comm) = tokio::fs::read_to_string(dir.join("comm")).await {
        if comm.trim_end() == process {
            return true;
        }
    }
    let Ok(cmdline) = tokio::fs::read(dir.join("cmdline")).await else {
        return false;
    };
    let argv0 = cmdline.split(|b| *b == 0).next().unwrap_or_default();
    let argv0 = String::from_utf8_lossy(argv0);
    Path::new(argv0.as_ref())
        .file_name()
        .is_some_and(|name| name == process)
}

#[async_trait]
impl ProcessNotifier for ProcfsNotifier {
    async fn notify(&self, process: &str, signal: IpcSignal) -> CfgMgrResult<()> {
        let pids = self.find_pids(process).await?;
        if pids.is_empty() {
            return Err(CfgMgrError::notify(process, "no running process"));
        }

        for pid in pids {
            match kill(Pid::from_raw(pid), signal.as_signal()) {
                Ok(()) => tracing::debug!(process, pid, signal = ?signal, "signalled"),
                Err(Errno::ESRCH) => tracing::debug!(process, pid, "exited before signal"),
                Err(e) => {
                    return Err(CfgMgrError::notify(process, format!("kill({}): {}", pid, e)))
                }
            }
        }
        Ok(())
    }
}
