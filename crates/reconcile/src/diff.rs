//! Delta computation between desired and current state

use crate::types::{ChangeOp, ConfigDelta, CurrentStateSnapshot, DesiredState, DesiredValue};
use serde::{Deserialize, Serialize};

/// Compute the minimal ordered delta that moves `current` toward `desired`
///
/// Only declared keys are considered: statements present on the device but
/// absent from `desired` are never touched. Operations follow the declaration
/// order of `desired`.
pub fn compute(desired: &DesiredState, current: &CurrentStateSnapshot) -> ConfigDelta {
    let ops = desired
        .items()
        .iter()
        .filter_map(|item| match &item.value {
            DesiredValue::Absent => current
                .is_configured(&item.path)
                .then(|| ChangeOp::Delete {
                    path: item.path.clone(),
                }),
            DesiredValue::Value(value) => {
                (!current.has_value(&item.path, value)).then(|| ChangeOp::Set {
                    path: item.path.clone(),
                    value: value.clone(),
                })
            }
        })
        .collect();
    ConfigDelta::new(ops)
}

/// Counts describing a computed delta
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Keys whose value will be set
    pub sets: usize,
    /// Keys that will be removed
    pub deletes: usize,
    /// Declared keys already in the desired state
    pub unchanged: usize,
}

impl DiffSummary {
    pub fn new(desired: &DesiredState, delta: &ConfigDelta) -> Self {
        Self {
            sets: delta.set_count(),
            deletes: delta.delete_count(),
            unchanged: desired.len().saturating_sub(delta.len()),
        }
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.sets + self.deletes
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}
