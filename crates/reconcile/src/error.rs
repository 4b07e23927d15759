//! Error types for device provisioning.
//!
//! Every failure raised while a device is processed is reduced to a
//! [`DeviceError`] carrying one of a closed set of [`ErrorKind`]s, so results
//! can be asserted on by kind instead of by message text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of per-device failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Device unreachable, authentication rejected, or connect timeout
    Connection,
    /// Staged change set rejected by the device
    ConfigLoad,
    /// Commit rejected by the device
    Commit,
    /// Candidate configuration locked by another session
    Lock,
    /// Anything else that went wrong while handling a device
    Unexpected,
}

impl ErrorKind {
    /// Short label used in logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connection => "connection error",
            Self::ConfigLoad => "config load error",
            Self::Commit => "commit error",
            Self::Lock => "lock error",
            Self::Unexpected => "unexpected error",
        }
    }

    /// Whether the failure happened while changing configuration
    /// (as opposed to reaching the device at all).
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad | Self::Commit | Self::Lock)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A failure while processing a single device.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct DeviceError {
    /// Failure category
    pub kind: ErrorKind,
    /// Human-readable detail, usually the device's own error text
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn config_load(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigLoad, message)
    }

    pub fn commit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Commit, message)
    }

    pub fn lock(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lock, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    /// Re-classify this error under `kind`, keeping the message.
    ///
    /// Lock errors keep their kind regardless of which request surfaced them.
    pub fn reclassify(mut self, kind: ErrorKind) -> Self {
        if self.kind != ErrorKind::Lock {
            self.kind = kind;
        }
        self
    }
}

/// Errors that abort a fleet run as a whole.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Nothing to do: the inventory or the target selection is empty
    #[error("no devices to configure")]
    NoDevices,

    /// A desired-state item was declared twice for the same device
    #[error("duplicate desired-state key '{path}'")]
    DuplicateKey {
        /// The repeated configuration path
        path: String,
    },

    /// The worker pool for concurrent runs could not be created
    #[error("failed to create worker pool: {0}")]
    Pool(String),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
