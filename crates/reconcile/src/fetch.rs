//! Scoped reads of a device's current configuration

use crate::error::DeviceError;
use crate::session::{DeviceSession, Reply, Request};
use crate::types::{ConfigPath, CurrentStateSnapshot, DesiredState};

/// Number of leading path tokens used as a scope root
const DEFAULT_SCOPE_DEPTH: usize = 2;

/// Subtrees of the configuration that a read is restricted to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    roots: Vec<ConfigPath>,
}

impl Scope {
    /// Scope covering every key of `desired`
    pub fn for_desired(desired: &DesiredState) -> Self {
        Self::from_roots(desired.paths().map(|p| p.truncate(DEFAULT_SCOPE_DEPTH)))
    }

    /// Scope from explicit roots; roots nested under another root are dropped
    pub fn from_roots(roots: impl IntoIterator<Item = ConfigPath>) -> Self {
        let mut kept: Vec<ConfigPath> = Vec::new();
        for root in roots.into_iter().filter(|r| !r.is_empty()) {
            if kept.iter().any(|k| k.covers(root.as_str())) {
                continue;
            }
            kept.retain(|k| !root.covers(k.as_str()));
            kept.push(root);
        }
        Self { roots: kept }
    }

    pub fn roots(&self) -> &[ConfigPath] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Whether a statement falls inside this scope
    pub fn contains(&self, statement: &str) -> bool {
        self.roots.iter().any(|r| r.covers(statement))
    }
}

/// Outcome of a fetch
///
/// A failed read still yields a (empty) snapshot; the failure is reported
/// alongside so the caller can decide how to treat it.
#[derive(Debug, Clone, Default)]
pub struct Fetched {
    pub snapshot: CurrentStateSnapshot,
    pub failure: Option<DeviceError>,
}

/// Reads and normalizes current state
#[derive(Debug, Clone, Copy, Default)]
pub struct StateFetcher;

impl StateFetcher {
    pub fn new() -> Self {
        Self
    }

    /// Read the configuration under `scope`
    pub fn fetch(&self, session: &mut DeviceSession, scope: &Scope) -> Fetched {
        if scope.is_empty() {
            return Fetched::default();
        }

        let request = Request::GetConfiguration {
            scope: scope.clone(),
        };
        match session.execute(&request) {
            Ok(Reply::Config(text)) => {
                let snapshot = parse_configuration(&text, scope);
                log::debug!(
                    "{}: fetched {} statement(s) under {} root(s)",
                    session.device(),
                    snapshot.len(),
                    scope.roots().len()
                );
                Fetched {
                    snapshot,
                    failure: None,
                }
            }
            Ok(other) => {
                log::warn!(
                    "{}: unexpected reply to get-configuration: {:?}",
                    session.device(),
                    other
                );
                Fetched {
                    snapshot: CurrentStateSnapshot::new(),
                    failure: Some(DeviceError::unexpected(format!(
                        "unexpected reply to get-configuration: {:?}",
                        other
                    ))),
                }
            }
            Err(e) => {
                log::error!(
                    "{}: failed to read current configuration: {}",
                    session.device(),
                    e
                );
                Fetched {
                    snapshot: CurrentStateSnapshot::new(),
                    failure: Some(e),
                }
            }
        }
    }
}

/// Parse `set`-format configuration text into a snapshot
///
/// Anything that is not a `set` statement (comments, blank lines,
/// `deactivate` lines) is ignored. Statements outside `scope` are dropped.
pub fn parse_configuration(text: &str, scope: &Scope) -> CurrentStateSnapshot {
    let statements = text
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("set "))
        .map(|s| ConfigPath::new(s).as_str().to_string())
        .filter(|s| scope.is_empty() || scope.contains(s));
    CurrentStateSnapshot::from_statements(statements)
}
