//! Shell command execution utilities.
//!
//! Kernel state is changed through the `ip` and `nft` binaries. Commands are
//! run through `/bin/sh -c`, so every untrusted argument must pass through
//! [`shellquote`].
//!
//! # Example
//!
//! ```ignore
//! use router_cfgmgr_common::shell::{self, IP_CMD, shellquote};
//!
//! let cmd = format!("{} link set dev {} up", IP_CMD, shellquote("uplink0"));
//! shell::exec_or_throw(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{CfgMgrError, CfgMgrResult};

/// Path to the `ip` command for link, address and route configuration.
pub const IP_CMD: &str = "/sbin/ip";

/// Path to the `nft` command for packet filter configuration.
pub const NFT_CMD: &str = "/usr/sbin/nft";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// Wraps the string in double quotes and escapes `$`, `` ` ``, `"`, `\` and
/// newline.
///
/// ```
/// use router_cfgmgr_common::shell::shellquote;
///
/// assert_eq!(shellquote("uplink0"), "\"uplink0\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The stdout output, trimmed.
    pub stdout: String,
    /// The stderr output, trimmed.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Returns stdout, or a [`CfgMgrError::ShellCommandFailed`] for `cmd` on
    /// non-zero exit.
    pub fn into_stdout(self, cmd: &str) -> CfgMgrResult<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(CfgMgrError::ShellCommandFailed {
                command: cmd.to_string(),
                exit_code: self.exit_code,
                output: self.combined_output(),
            })
        }
    }
}

fn log_result(cmd: &str, result: &ExecResult) {
    if result.success() {
        tracing::trace!(command = %cmd, exit_code = result.exit_code, "Command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }
}

fn shell_command(cmd: &str) -> Command {
    let mut command = Command::new("/bin/sh");
    command
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command
}

fn to_result(output: std::process::Output) -> ExecResult {
    ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

/// Executes a shell command asynchronously.
///
/// Returns `Err` only if the command could not be spawned; a non-zero exit is
/// reported through [`ExecResult::exit_code`].
pub async fn exec(cmd: &str) -> CfgMgrResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = shell_command(cmd)
        .output()
        .await
        .map_err(|e| CfgMgrError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = to_result(output);
    log_result(cmd, &result);
    Ok(result)
}

/// Executes a shell command and returns its stdout, failing on non-zero exit.
pub async fn exec_or_throw(cmd: &str) -> CfgMgrResult<String> {
    exec(cmd).await?.into_stdout(cmd)
}

/// Executes a shell command with `input` written to its stdin, failing on
/// non-zero exit.
///
/// Used to hand `nft -f -` a whole transaction at once.
pub async fn exec_with_input(cmd: &str, input: &str) -> CfgMgrResult<String> {
    tracing::debug!(command = %cmd, input_len = input.len(), "Executing shell command with input");

    let spawn_err = |e| CfgMgrError::ShellExec {
        command: cmd.to_string(),
        source: e,
    };

    let mut child = shell_command(cmd)
        .stdin(Stdio::piped())
        .spawn()
        .map_err(spawn_err)?;

    // Output is drained while stdin is written, so a child that answers
    // before reading all of its input cannot fill a pipe and stall.
    let stdin = child.stdin.take();
    let write = async move {
        if let Some(mut stdin) = stdin {
            stdin.write_all(input.as_bytes()).await?;
            // Dropping stdin closes the pipe so the child sees EOF.
        }
        Ok::<(), std::io::Error>(())
    };
    let (written, output) = tokio::join!(write, child.wait_with_output());

    let result = to_result(output.map_err(spawn_err)?);
    log_result(cmd, &result);
    if result.success() {
        // A child that exits cleanly without reading everything still lost input.
        written.map_err(spawn_err)?;
    }
    result.into_stdout(cmd)
}
