//! Common infrastructure for the router's configuration daemons.
//!
//! - [`shell`]: Safe shell command execution with proper quoting
//! - [`ipc`]: Signalling sibling daemons after a configuration change
//! - [`error`]: Error types for cfgmgr operations
//!
//! # Example
//!
//! ```ignore
//! use router_cfgmgr_common::{
//!     shell::{self, IP_CMD, shellquote},
//!     CfgMgrResult,
//! };
//!
//! async fn set_up(link: &str) -> CfgMgrResult<()> {
//!     let cmd = format!("{} link set dev {} up", IP_CMD, shellquote(link));
//!     shell::exec_or_throw(&cmd).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod ipc;
pub mod shell;

// Re-export commonly used items at crate root
pub use error::{CfgMgrError, CfgMgrResult};
pub use ipc::{IpcSignal, ProcessNotifier, ProcfsNotifier};
