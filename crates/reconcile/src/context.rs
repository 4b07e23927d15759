//! Provider traits and run-wide context
//!
//! These traits let the engine run without depending on where desired state,
//! credentials or progress output come from.

use crate::applier::ProvisioningResult;
use crate::error::DeviceError;
use crate::fetch::Scope;
use crate::orchestrator::FleetReport;
use crate::types::{ConfigDelta, Credential, Device, DesiredState};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Supplies the desired state for each device
///
/// One implementation per role (interface descriptions, syslog, ...). Roles
/// are data, not code: the engine treats every provider the same way.
pub trait DesiredStateProvider: Send + Sync {
    /// Role name, used in logs and commit comments
    fn name(&self) -> &str;

    /// What this role does, recorded in commit comments
    fn purpose(&self) -> &str {
        self.name()
    }

    /// Desired state for `device`; empty when the role has nothing for it
    fn desired_state(&self, device: &str) -> DesiredState;

    /// Credential to connect with, overriding the device's own reference
    fn credential_override(&self) -> Option<&str> {
        None
    }

    /// Scope to read for `device`; defaults to the desired keys' subtrees
    fn scope(&self, device: &str, desired: &DesiredState) -> Scope {
        let _ = device;
        Scope::for_desired(desired)
    }

    /// Comment attached to the commit on `device`
    fn commit_comment(&self, device: &str, delta: &ConfigDelta) -> String {
        format!(
            "{} on {}: {} item(s) ({} set, {} delete)",
            self.purpose(),
            device,
            delta.len(),
            delta.set_count(),
            delta.delete_count()
        )
    }
}

/// Resolves credential references to login material
pub trait CredentialProvider: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<Credential, DeviceError>;
}

/// Receives progress events during a fleet run
///
/// In concurrent runs device events are delivered after all workers finish.
pub trait FleetObserver: Send {
    /// Called once before any device is processed
    fn on_run_start(&mut self, devices: &[&Device], dry_run: bool);

    /// Called before a device is processed
    fn on_device_start(&mut self, index: usize, total: usize, device: &Device);

    /// Called when a device reaches a terminal state
    fn on_device_complete(&mut self, result: &ProvisioningResult);

    /// Called once with the final report
    fn on_run_complete(&mut self, report: &FleetReport);
}

/// No-op observer
pub struct NoObserver;

impl FleetObserver for NoObserver {
    fn on_run_start(&mut self, _devices: &[&Device], _dry_run: bool) {}
    fn on_device_start(&mut self, _index: usize, _total: usize, _device: &Device) {}
    fn on_device_complete(&mut self, _result: &ProvisioningResult) {}
    fn on_run_complete(&mut self, _report: &FleetReport) {}
}

/// Shared flag raised when a run should stop starting new devices
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
