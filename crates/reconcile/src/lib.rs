//! # Reconcile
//!
//! Converges network devices toward a declared configuration.
//!
//! The engine reads the relevant part of each device's configuration,
//! computes the minimal set of changes, and stages, verifies and commits them
//! transactionally. A fleet run applies one role to many devices, isolating
//! every device's failure from the others.
//!
//! ## Core Concepts
//!
//! - **DesiredState**: ordered configuration paths mapped to a value or to
//!   "must be absent"
//! - **CurrentStateSnapshot**: the live configuration under a [`Scope`]
//! - **ConfigDelta**: the minimal ordered `Set`/`Delete` operations
//! - **ConfigApplier**: per-device state machine from connect to commit
//! - **FleetOrchestrator**: runs a role across an [`Inventory`]
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{FleetOrchestrator, Inventory, NoObserver, ApplyOptions};
//!
//! let report = FleetOrchestrator::new(&connector, &credentials)
//!     .with_options(ApplyOptions { dry_run: true, ..Default::default() })
//!     .run(&inventory, &role, None, &mut NoObserver)?;
//!
//! println!("{}/{} devices succeeded", report.succeeded(), report.total());
//! ```
//!
//! ## Provider Traits
//!
//! The engine does no I/O of its own:
//!
//! - [`Connector`] / [`Transport`]: open sessions and carry requests
//! - [`DesiredStateProvider`]: one implementation per role
//! - [`CredentialProvider`]: resolves credential references
//! - [`FleetObserver`]: receives progress events
//! - [`PacingPolicy`]: spaces out device starts

pub mod applier;
pub mod context;
pub mod diff;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod pacing;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use applier::{ApplyPhase, ConfigApplier, Outcome, ProvisioningResult, UnchangedReason};
pub use context::{CancelFlag, CredentialProvider, DesiredStateProvider, FleetObserver, NoObserver};
pub use diff::{DiffSummary, compute as compute_delta};
pub use error::{DeviceError, ErrorKind, FleetError};
pub use fetch::{Fetched, Scope, StateFetcher};
pub use orchestrator::{FleetOrchestrator, FleetReport, Inventory, Selection};
pub use pacing::{Interval, NoPacing, PacingPolicy, TokenBucket};
pub use session::{CommitStatus, Connector, DeviceSession, Reply, Request, Transport};
pub use types::{
    ApplyOptions, ChangeOp, CommitRecord, ConfigDelta, ConfigPath, Credential,
    CurrentStateSnapshot, DesiredState, DesiredStateItem, DesiredValue, Device,
    FetchFailurePolicy,
};
