//! Per-device apply state machine
//!
//! A device moves through
//! `Idle → Connected → Fetched → Diffed → {NoOpDone | Previewed | Committed | Failed}`.
//! Every path out of the machine closes the device session.

use crate::context::DesiredStateProvider;
use crate::diff;
use crate::error::{DeviceError, ErrorKind, Result};
use crate::fetch::StateFetcher;
use crate::session::{CommitStatus, Connector, DeviceSession, Reply, Request};
use crate::types::{
    ApplyOptions, CommitRecord, ConfigDelta, Credential, Device, FetchFailurePolicy,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Where a device is in the apply state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyPhase {
    Idle,
    Connected,
    Fetched,
    Diffed,
    NoOpDone,
    Previewed,
    Committed,
    Failed,
}

impl ApplyPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NoOpDone | Self::Previewed | Self::Committed | Self::Failed
        )
    }
}

/// Why a device needed no change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnchangedReason {
    /// The computed delta was empty
    InSync,
    /// The delta was staged but the device saw nothing to change
    DeviceReportedNoDiff,
}

/// Terminal outcome for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Outcome {
    /// Nothing to do
    Unchanged { reason: UnchangedReason },
    /// Dry run: the delta that would be applied
    Previewed { delta: ConfigDelta, comment: String },
    /// Changes committed on the device
    Committed {
        record: CommitRecord,
        /// The commit completed but the device reported no effect
        no_effect: bool,
    },
    /// Processing stopped with an error
    Failed {
        error: DeviceError,
        /// Last phase reached before the failure
        during: ApplyPhase,
    },
}

/// Result of provisioning one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningResult {
    pub device: String,
    /// Terminal phase
    pub phase: ApplyPhase,
    pub outcome: Outcome,
    /// Set when current state could not be read and was assumed empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_warning: Option<String>,
    pub elapsed_ms: u64,
}

impl ProvisioningResult {
    /// Build a failed result for a device that never reached the applier
    pub fn failed(device: &str, error: DeviceError) -> Self {
        Self {
            device: device.to_string(),
            phase: ApplyPhase::Failed,
            outcome: Outcome::Failed {
                error,
                during: ApplyPhase::Idle,
            },
            fetch_warning: None,
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, Outcome::Failed { .. })
    }

    pub fn error(&self) -> Option<&DeviceError> {
        match &self.outcome {
            Outcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(|e| e.kind)
    }

    /// Items changed, or that would change in a dry run
    pub fn items_changed(&self) -> usize {
        match &self.outcome {
            Outcome::Previewed { delta, .. } => delta.len(),
            Outcome::Committed { record, .. } => record.items,
            Outcome::Unchanged { .. } | Outcome::Failed { .. } => 0,
        }
    }

    /// Deletions among the changed items
    pub fn deletes(&self) -> usize {
        match &self.outcome {
            Outcome::Previewed { delta, .. } => delta.delete_count(),
            Outcome::Committed { record, .. } => record.deletes,
            Outcome::Unchanged { .. } | Outcome::Failed { .. } => 0,
        }
    }
}

/// Drives a single device from connect to a terminal state
pub struct ConfigApplier<'a> {
    connector: &'a dyn Connector,
    fetcher: StateFetcher,
    options: ApplyOptions,
}

impl<'a> ConfigApplier<'a> {
    pub fn new(connector: &'a dyn Connector, options: ApplyOptions) -> Self {
        Self {
            connector,
            fetcher: StateFetcher::new(),
            options,
        }
    }

    pub fn options(&self) -> &ApplyOptions {
        &self.options
    }

    /// Provision `device` with the desired state from `provider`
    ///
    /// Never returns an error: failures become [`Outcome::Failed`].
    pub fn apply(
        &self,
        device: &Device,
        credential: &Credential,
        provider: &dyn DesiredStateProvider,
    ) -> ProvisioningResult {
        let started = Instant::now();
        let mut phase = ApplyPhase::Idle;
        let mut fetch_warning = None;

        let outcome = match self.drive(device, credential, provider, &mut phase, &mut fetch_warning)
        {
            Ok(outcome) => outcome,
            Err(error) => {
                log::error!("{}: {}", device.name, error);
                let during = phase;
                phase = ApplyPhase::Failed;
                Outcome::Failed { error, during }
            }
        };
        debug_assert!(phase.is_terminal());

        ProvisioningResult {
            device: device.name.clone(),
            phase,
            outcome,
            fetch_warning,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn drive(
        &self,
        device: &Device,
        credential: &Credential,
        provider: &dyn DesiredStateProvider,
        phase: &mut ApplyPhase,
        fetch_warning: &mut Option<String>,
    ) -> Result<Outcome> {
        let name = device.name.as_str();
        let desired = provider.desired_state(name);
        if desired.is_empty() {
            log::warn!("{}: role '{}' declares nothing for this device", name, provider.name());
        }

        // Closed on drop, including on every early return below.
        let mut session =
            DeviceSession::open(self.connector, device, credential, self.options.timeout)?;
        advance(name, phase, ApplyPhase::Connected);

        let scope = provider.scope(name, &desired);
        let fetched = self.fetcher.fetch(&mut session, &scope);
        if let Some(failure) = fetched.failure {
            match self.options.fetch_failure {
                FetchFailurePolicy::Fail => return Err(failure),
                FetchFailurePolicy::AssumeEmpty => {
                    log::warn!(
                        "{}: current state unknown ({}); assuming nothing is configured",
                        name,
                        failure
                    );
                    *fetch_warning = Some(failure.to_string());
                }
            }
        }
        advance(name, phase, ApplyPhase::Fetched);

        let delta = diff::compute(&desired, &fetched.snapshot);
        advance(name, phase, ApplyPhase::Diffed);

        if delta.is_empty() {
            log::info!("{}: all {} item(s) already in desired state", name, desired.len());
            advance(name, phase, ApplyPhase::NoOpDone);
            return Ok(Outcome::Unchanged {
                reason: UnchangedReason::InSync,
            });
        }

        let comment = provider.commit_comment(name, &delta);
        log::info!(
            "{}: {} change(s) pending ({} set, {} delete)",
            name,
            delta.len(),
            delta.set_count(),
            delta.delete_count()
        );
        for op in delta.ops() {
            if op.is_delete() {
                log::warn!("{}:   {}", name, op);
            } else {
                log::info!("{}:   {}", name, op);
            }
        }

        if self.options.dry_run {
            advance(name, phase, ApplyPhase::Previewed);
            return Ok(Outcome::Previewed { delta, comment });
        }

        session.execute(&Request::Lock)?;
        let result = self.stage_and_commit(&mut session, &delta, comment);
        if !matches!(result, Ok(Outcome::Committed { .. })) {
            discard(&mut session);
        }
        unlock(&mut session);

        let outcome = result?;
        let terminal = match outcome {
            Outcome::Committed { .. } => ApplyPhase::Committed,
            _ => ApplyPhase::NoOpDone,
        };
        advance(name, phase, terminal);
        Ok(outcome)
    }

    fn stage_and_commit(
        &self,
        session: &mut DeviceSession,
        delta: &ConfigDelta,
        comment: String,
    ) -> Result<Outcome> {
        let name = session.device().to_string();

        let load = Request::LoadConfiguration {
            text: delta.render(),
        };
        expect_ack(&load, session.execute(&load)?)?;

        let diff = match session.execute(&Request::Diff)? {
            Reply::Diff(diff) => diff.filter(|d| !d.trim().is_empty()),
            other => return Err(unexpected_reply(&Request::Diff, &other)),
        };
        let Some(diff) = diff else {
            log::warn!("{}: device reports no pending changes after load", name);
            return Ok(Outcome::Unchanged {
                reason: UnchangedReason::DeviceReportedNoDiff,
            });
        };
        log::debug!("{}: pending changes:\n{}", name, diff);

        let commit = Request::Commit {
            comment: comment.clone(),
        };
        let status = match session.execute(&commit)? {
            Reply::Commit(status) => status,
            other => return Err(unexpected_reply(&commit, &other)),
        };

        let no_effect = status == CommitStatus::NoEffect;
        if no_effect {
            log::warn!("{}: commit completed but reported no effect", name);
        } else {
            log::info!("{}: committed {} item(s)", name, delta.len());
        }

        Ok(Outcome::Committed {
            record: CommitRecord {
                comment,
                timestamp: Utc::now(),
                diff,
                items: delta.len(),
                sets: delta.set_count(),
                deletes: delta.delete_count(),
            },
            no_effect,
        })
    }
}

fn advance(device: &str, phase: &mut ApplyPhase, next: ApplyPhase) {
    log::debug!("{}: {:?} -> {:?}", device, phase, next);
    *phase = next;
}

fn expect_ack(request: &Request, reply: Reply) -> Result<()> {
    match reply {
        Reply::Ack => Ok(()),
        other => Err(unexpected_reply(request, &other)),
    }
}

fn unexpected_reply(request: &Request, reply: &Reply) -> DeviceError {
    DeviceError::new(
        request.error_kind(),
        format!("unexpected reply to {}: {:?}", request.name(), reply),
    )
}

fn discard(session: &mut DeviceSession) {
    if let Err(e) = session.execute(&Request::Discard) {
        log::warn!("{}: failed to discard staged changes: {}", session.device(), e);
    }
}

fn unlock(session: &mut DeviceSession) {
    if let Err(e) = session.execute(&Request::Unlock) {
        log::warn!("{}: failed to release configuration lock: {}", session.device(), e);
    }
}
