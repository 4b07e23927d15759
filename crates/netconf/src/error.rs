//! Error types for NETCONF sessions.
//!
//! Errors are categorized so callers can map them onto their own error
//! taxonomy and give appropriate feedback. Transport failures are classified
//! from the ssh client's stderr, RPC failures from the `<rpc-error>` content.

use std::time::Duration;
use thiserror::Error;

/// Categories of NETCONF errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Host unreachable, refused, or the session dropped
    Connection,
    /// Login rejected
    Authentication,
    /// No reply within the configured timeout
    Timeout,
    /// Configuration database is locked by another session
    Lock,
    /// The device rejected the request
    Rpc,
    /// Malformed or unexpected protocol data
    Protocol,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether the failure happened before a usable session existed.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection | Self::Authentication | Self::Timeout
        )
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Connection => "Device unreachable",
            Self::Authentication => "Authentication failed",
            Self::Timeout => "Device did not answer in time",
            Self::Lock => "Configuration locked",
            Self::Rpc => "Request rejected by device",
            Self::Protocol => "Protocol error",
            Self::Other => "Unexpected error",
        }
    }
}

/// One `<rpc-error>` element from a reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcError {
    /// `<error-tag>`, e.g. `lock-denied`
    pub tag: Option<String>,
    /// `<error-severity>`, `error` or `warning`
    pub severity: String,
    /// `<error-message>`
    pub message: String,
    /// `<error-path>` or `<bad-element>` when present
    pub path: Option<String>,
}

impl RpcError {
    /// Whether this entry fails the RPC (warnings don't).
    pub fn is_error(&self) -> bool {
        !self.severity.eq_ignore_ascii_case("warning")
    }

    /// Whether the device refused a lock because another session holds it.
    pub fn is_lock_denied(&self) -> bool {
        let message = self.message.to_lowercase();
        self.tag.as_deref() == Some("lock-denied")
            || message.contains("configuration database locked")
            || message.contains("database is locked")
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(path) = &self.path {
            write!(f, " (at {})", path)?;
        }
        Ok(())
    }
}

/// Errors that can occur during a NETCONF session.
#[derive(Debug, Error)]
pub enum Error {
    /// The ssh client could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Host unreachable, refused, or the session closed unexpectedly
    #[error("connection failed: {message}")]
    Connection {
        /// Details from the ssh client
        message: String,
    },

    /// Login rejected
    #[error("authentication failed: {message}")]
    Authentication {
        /// Details from the ssh client
        message: String,
    },

    /// No reply within the timeout
    #[error("timed out after {}s waiting for {operation}", timeout.as_secs())]
    Timeout {
        /// What we were waiting for
        operation: String,
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// The device answered with one or more `<rpc-error>` of severity error
    #[error("{operation} failed: {}", join_errors(errors))]
    Rpc {
        /// The RPC that failed
        operation: String,
        /// Error entries, warnings excluded
        errors: Vec<RpcError>,
    },

    /// Malformed or unexpected protocol data
    #[error("protocol error: {0}")]
    Protocol(String),

    /// IO error on the session streams
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_errors(errors: &[RpcError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Spawn { .. } | Error::Connection { .. } => ErrorCategory::Connection,
            Error::Authentication { .. } => ErrorCategory::Authentication,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::Rpc { errors, .. } if errors.iter().any(RpcError::is_lock_denied) => {
                ErrorCategory::Lock
            }
            Error::Rpc { .. } => ErrorCategory::Rpc,
            Error::Protocol(_) => ErrorCategory::Protocol,
            Error::Io(_) => ErrorCategory::Other,
        }
    }

    /// Create an error from what the ssh client printed before the session
    /// went away.
    pub fn from_ssh_stderr(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        let message = if stderr.trim().is_empty() {
            "session closed by remote host".to_string()
        } else {
            stderr.trim().to_string()
        };

        if lower.contains("permission denied")
            || lower.contains("authentication failed")
            || lower.contains("too many authentication failures")
            || lower.contains("incorrect password")
        {
            return Error::Authentication { message };
        }

        // Refused, unresolvable, unreachable, host key problems, connect
        // timeouts and plain disconnects all leave the device unusable.
        Error::Connection { message }
    }
}

/// Result type for NETCONF operations.
pub type Result<T> = std::result::Result<T, Error>;
