//! Fleet runs - applies a role to many devices with failure isolation

use crate::applier::{ConfigApplier, ProvisioningResult};
use crate::context::{CancelFlag, CredentialProvider, DesiredStateProvider, FleetObserver};
use crate::error::{DeviceError, ErrorKind, FleetError};
use crate::pacing::{Interval, PacingPolicy};
use crate::session::Connector;
use crate::types::{ApplyOptions, Device};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Devices known to a run, ordered by name
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    devices: BTreeMap<String, Device>,
}

/// Devices picked from an inventory for one run
#[derive(Debug)]
pub struct Selection<'a> {
    pub devices: Vec<&'a Device>,
    /// Requested names not in the inventory
    pub unknown: Vec<String>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let mut inventory = Self::new();
        for device in devices {
            inventory.insert(device);
        }
        inventory
    }

    pub fn insert(&mut self, device: Device) {
        self.devices.insert(device.name.clone(), device);
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Pick `targets` (all devices when `None`), in inventory order
    pub fn select(&self, targets: Option<&[String]>) -> Selection<'_> {
        let Some(targets) = targets else {
            return Selection {
                devices: self.devices.values().collect(),
                unknown: Vec::new(),
            };
        };

        let mut unknown: Vec<String> = Vec::new();
        for name in targets {
            if !self.devices.contains_key(name) && !unknown.contains(name) {
                unknown.push(name.clone());
            }
        }
        let devices = self
            .devices
            .values()
            .filter(|d| targets.contains(&d.name))
            .collect();
        Selection { devices, unknown }
    }
}

/// Aggregated outcome of a fleet run
#[derive(Debug, Clone, Serialize)]
pub struct FleetReport {
    pub role: String,
    pub dry_run: bool,
    /// Per-device results in device order
    pub results: Vec<ProvisioningResult>,
    /// Devices not started because the run was interrupted
    pub skipped: Vec<String>,
    /// Requested device names that were not in the inventory
    pub unknown: Vec<String>,
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl FleetReport {
    /// Devices targeted by the run, including skipped ones
    pub fn total(&self) -> usize {
        self.results.len() + self.skipped.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    /// Percentage of targeted devices that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.succeeded() as f64 / self.total() as f64 * 100.0
    }

    pub fn failed_devices(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.device.as_str())
            .collect()
    }

    /// Every targeted device finished successfully
    pub fn is_success(&self) -> bool {
        !self.interrupted && self.skipped.is_empty() && self.failed() == 0
    }

    /// Items changed across the fleet (or that would change in a dry run)
    pub fn items_changed(&self) -> usize {
        self.results.iter().map(ProvisioningResult::items_changed).sum()
    }

    pub fn deletes(&self) -> usize {
        self.results.iter().map(ProvisioningResult::deletes).sum()
    }
}

/// Runs a role against a set of devices
///
/// Each device is processed by a fresh [`ConfigApplier`]; a failure or panic
/// in one device is recorded and never stops the others.
pub struct FleetOrchestrator<'a> {
    connector: &'a dyn Connector,
    credentials: &'a dyn CredentialProvider,
    pacing: Box<dyn PacingPolicy>,
    options: ApplyOptions,
    jobs: usize,
    cancel: CancelFlag,
}

impl<'a> FleetOrchestrator<'a> {
    pub fn new(connector: &'a dyn Connector, credentials: &'a dyn CredentialProvider) -> Self {
        Self {
            connector,
            credentials,
            pacing: Box::new(Interval::default()),
            options: ApplyOptions::default(),
            jobs: 1,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_options(mut self, options: ApplyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_pacing(mut self, pacing: Box<dyn PacingPolicy>) -> Self {
        self.pacing = pacing;
        self
    }

    /// Devices processed at once; 1 is sequential
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Apply `provider` to the selected devices
    ///
    /// Only an empty selection or a thread pool failure is an error; device
    /// failures are reported in the returned [`FleetReport`].
    pub fn run(
        &self,
        inventory: &Inventory,
        provider: &dyn DesiredStateProvider,
        targets: Option<&[String]>,
        observer: &mut dyn FleetObserver,
    ) -> Result<FleetReport, FleetError> {
        let selection = inventory.select(targets);
        for name in &selection.unknown {
            log::warn!("Unknown device '{}' ignored", name);
        }
        if selection.devices.is_empty() {
            return Err(FleetError::NoDevices);
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let devices = selection.devices;
        log::info!(
            "Applying role '{}' to {} device(s){}",
            provider.name(),
            devices.len(),
            if self.options.dry_run { " (dry run)" } else { "" }
        );
        observer.on_run_start(&devices, self.options.dry_run);

        let (results, skipped) = if self.jobs == 1 || devices.len() == 1 {
            self.run_sequential(&devices, provider, observer)
        } else {
            self.run_parallel(&devices, provider, observer)?
        };

        let interrupted = self.cancel.is_cancelled();
        if interrupted {
            log::warn!("Run interrupted; {} device(s) not started", skipped.len());
        }

        let report = FleetReport {
            role: provider.name().to_string(),
            dry_run: self.options.dry_run,
            results,
            skipped,
            unknown: selection.unknown,
            interrupted,
            started_at,
            elapsed_ms: clock.elapsed().as_millis() as u64,
        };
        observer.on_run_complete(&report);
        Ok(report)
    }

    fn run_sequential(
        &self,
        devices: &[&Device],
        provider: &dyn DesiredStateProvider,
        observer: &mut dyn FleetObserver,
    ) -> (Vec<ProvisioningResult>, Vec<String>) {
        let total = devices.len();
        let mut results = Vec::with_capacity(total);
        let mut skipped = Vec::new();

        for (index, device) in devices.iter().enumerate() {
            self.pacing.pace(index, &self.cancel);
            if self.cancel.is_cancelled() {
                skipped.extend(devices[index..].iter().map(|d| d.name.clone()));
                break;
            }
            observer.on_device_start(index, total, device);
            let result = self.provision(device, provider);
            observer.on_device_complete(&result);
            results.push(result);
        }
        (results, skipped)
    }

    fn run_parallel(
        &self,
        devices: &[&Device],
        provider: &dyn DesiredStateProvider,
        observer: &mut dyn FleetObserver,
    ) -> Result<(Vec<ProvisioningResult>, Vec<String>), FleetError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| FleetError::Pool(e.to_string()))?;

        let started = AtomicUsize::new(0);
        // Workers share nothing but the start counter; results are joined in order.
        let outcomes: Vec<Option<ProvisioningResult>> = pool.install(|| {
            devices
                .par_iter()
                .map(|device| {
                    self.pacing
                        .pace(started.fetch_add(1, Ordering::SeqCst), &self.cancel);
                    if self.cancel.is_cancelled() {
                        return None;
                    }
                    Some(self.provision(device, provider))
                })
                .collect()
        });

        // Observers are not thread-safe, so events are replayed after the join.
        let total = devices.len();
        let mut results = Vec::with_capacity(total);
        let mut skipped = Vec::new();
        for (index, (device, outcome)) in devices.iter().zip(outcomes).enumerate() {
            match outcome {
                Some(result) => {
                    observer.on_device_start(index, total, device);
                    observer.on_device_complete(&result);
                    results.push(result);
                }
                None => skipped.push(device.name.clone()),
            }
        }
        Ok((results, skipped))
    }

    fn provision(
        &self,
        device: &Device,
        provider: &dyn DesiredStateProvider,
    ) -> ProvisioningResult {
        let reference = provider.credential_override().unwrap_or(&device.credential);
        let credential = match self.credentials.resolve(reference) {
            Ok(credential) => credential,
            Err(e) => {
                log::error!("{}: cannot resolve credential '{}': {}", device.name, reference, e);
                return ProvisioningResult::failed(
                    &device.name,
                    e.reclassify(ErrorKind::Connection),
                );
            }
        };

        let applier = ConfigApplier::new(self.connector, self.options.clone());
        match panic::catch_unwind(AssertUnwindSafe(|| {
            applier.apply(device, &credential, provider)
        })) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("{}: processing panicked: {}", device.name, message);
                ProvisioningResult::failed(
                    &device.name,
                    DeviceError::unexpected(format!("panicked: {}", message)),
                )
            }
        }
    }
}
