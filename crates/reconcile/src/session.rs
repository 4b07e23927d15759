//! Device sessions and the transport seam
//!
//! The engine never speaks a wire protocol itself. A [`Connector`] opens a
//! [`Transport`] for a device; [`DeviceSession`] owns that transport for the
//! duration of one device's processing and releases it on every exit path.

use crate::error::{DeviceError, ErrorKind, Result};
use crate::fetch::Scope;
use crate::types::{Credential, Device};
use std::time::Duration;

/// A structured request sent to a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Read the configuration under the given scope roots
    GetConfiguration { scope: Scope },
    /// Take the exclusive candidate lock
    Lock,
    /// Stage line-oriented `set`/`delete` text in the candidate
    LoadConfiguration { text: String },
    /// Ask the device for its preview of pending changes
    Diff,
    /// Activate the candidate, recording `comment` in the commit history
    Commit { comment: String },
    /// Throw away staged changes
    Discard,
    /// Release the candidate lock
    Unlock,
}

impl Request {
    /// Error kind that failures of this request are reported under
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Lock | Self::Unlock => ErrorKind::Lock,
            Self::LoadConfiguration { .. } | Self::Diff => ErrorKind::ConfigLoad,
            Self::Commit { .. } => ErrorKind::Commit,
            Self::GetConfiguration { .. } | Self::Discard => ErrorKind::Unexpected,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetConfiguration { .. } => "get-configuration",
            Self::Lock => "lock",
            Self::LoadConfiguration { .. } => "load-configuration",
            Self::Diff => "diff",
            Self::Commit { .. } => "commit",
            Self::Discard => "discard",
            Self::Unlock => "unlock",
        }
    }
}

/// Result of a commit that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    /// The device confirmed the commit
    Committed,
    /// The commit completed without error but reported no effect
    NoEffect,
}

/// A structured reply from a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Configuration text, one `set` statement per line
    Config(String),
    Ack,
    /// Pending-change preview; `None` when nothing is pending
    Diff(Option<String>),
    Commit(CommitStatus),
}

/// An open connection to one device
pub trait Transport: Send {
    /// Send a request and wait for its reply
    fn execute(&mut self, request: &Request) -> Result<Reply>;

    /// Release the connection
    fn close(&mut self) -> Result<()>;
}

/// Opens transports to devices
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        device: &Device,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>>;
}

/// An authenticated session with a single device
///
/// Dropping the session closes it.
pub struct DeviceSession {
    device: String,
    transport: Option<Box<dyn Transport>>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.device)
            .field("open", &self.is_open())
            .finish()
    }
}

impl DeviceSession {
    /// Connect to `device`; any failure is a connection error
    pub fn open(
        connector: &dyn Connector,
        device: &Device,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Self> {
        log::info!(
            "{}: connecting to {}:{} as '{}'",
            device.name,
            device.host,
            device.port,
            credential.username
        );
        let transport = connector
            .connect(device, credential, timeout)
            .map_err(|e| DeviceError::connection(e.message))?;
        log::debug!("{}: session established", device.name);
        Ok(Self {
            device: device.name.clone(),
            transport: Some(transport),
        })
    }

    /// Wrap an already-open transport
    pub fn from_transport(device: &str, transport: Box<dyn Transport>) -> Self {
        Self {
            device: device.to_string(),
            transport: Some(transport),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Send a request; failures take the request's error kind
    pub fn execute(&mut self, request: &Request) -> Result<Reply> {
        let transport = self.transport.as_mut().ok_or_else(|| {
            DeviceError::unexpected(format!("session to {} is closed", self.device))
        })?;
        log::trace!("{}: -> {}", self.device, request.name());
        transport
            .execute(request)
            .map_err(|e| e.reclassify(request.error_kind()))
    }

    /// Close the session. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            match transport.close() {
                Ok(()) => log::debug!("{}: session closed", self.device),
                Err(e) => log::warn!("{}: error while closing session: {}", self.device, e),
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}
