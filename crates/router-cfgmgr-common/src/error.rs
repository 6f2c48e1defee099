//! Error types for cfgmgr operations.
//!
//! This module defines the error type shared by the router's configuration
//! daemons. All errors implement `std::error::Error` via `thiserror`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use router_types::ParseError;

/// Result type alias for cfgmgr operations.
pub type CfgMgrResult<T> = Result<T, CfgMgrError>;

/// Errors that can occur during cfgmgr operations.
#[derive(Debug, Error)]
pub enum CfgMgrError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Reading or writing a file failed.
    #[error("{operation} {}: {source}", path.display())]
    Io {
        /// What was attempted (e.g. "read", "write").
        operation: &'static str,
        /// The file involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A JSON document could not be decoded.
    #[error("Failed to decode {}: {source}", path.display())]
    Json {
        /// The file (or command output) being decoded.
        path: PathBuf,
        /// The underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// A value failed to parse.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A link does not exist.
    #[error("Link '{link}' not found")]
    LinkNotFound {
        /// The link name.
        link: String,
    },

    /// One step of configuring a link failed.
    #[error("{step}({link}): {source}")]
    LinkStep {
        /// The step that failed (e.g. "rename", "spoof", "up", "address").
        step: &'static str,
        /// The link being configured.
        link: String,
        /// What went wrong.
        #[source]
        source: Box<CfgMgrError>,
    },

    /// A lease artifact is unusable.
    #[error("Invalid DHCP lease: {message}")]
    InvalidLease {
        /// Error message.
        message: String,
    },

    /// A port or port range is malformed.
    #[error("Malformed port {port:?}: {message}")]
    InvalidPort {
        /// The offending port string.
        port: String,
        /// Error message.
        message: String,
    },

    /// Packet filter operation failed.
    #[error("Netfilter operation failed: {operation}: {message}")]
    Netfilter {
        /// The operation that failed.
        operation: String,
        /// Error message.
        message: String,
    },

    /// Writing a kernel parameter failed.
    #[error("sysctl({key}={value}): {source}")]
    Sysctl {
        /// Dotted sysctl key.
        key: String,
        /// The value being written.
        value: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Signalling another process failed.
    #[error("Failed to notify {process}: {message}")]
    Notify {
        /// The process name.
        process: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl CfgMgrError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an I/O error for a path.
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Creates a JSON decode error for a path.
    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// Creates a link not found error.
    pub fn link_not_found(link: impl Into<String>) -> Self {
        Self::LinkNotFound { link: link.into() }
    }

    /// Wraps an error with the link configuration step that produced it.
    pub fn link_step(step: &'static str, link: impl Into<String>, source: CfgMgrError) -> Self {
        Self::LinkStep {
            step,
            link: link.into(),
            source: Box::new(source),
        }
    }

    /// Creates an invalid lease error.
    pub fn invalid_lease(message: impl Into<String>) -> Self {
        Self::InvalidLease {
            message: message.into(),
        }
    }

    /// Creates a malformed port error.
    pub fn invalid_port(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPort {
            port: port.into(),
            message: message.into(),
        }
    }

    /// Creates a netfilter error.
    pub fn netfilter(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Netfilter {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a notification error.
    pub fn notify(process: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Notify {
            process: process.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the error is a missing file, which most readers treat
    /// as "nothing configured yet".
    pub fn is_not_found(&self) -> bool {
        matches!(self, CfgMgrError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on the next reconciliation pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            CfgMgrError::LinkNotFound { .. }
            | CfgMgrError::ShellCommandFailed { .. }
            | CfgMgrError::Netfilter { .. } => true,
            CfgMgrError::LinkStep { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
