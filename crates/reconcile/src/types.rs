//! Core types for configuration reconciliation

use crate::error::FleetError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A network device in the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Unique name, used for ordering and reporting
    pub name: String,
    /// Hostname or address
    pub host: String,
    /// Management port
    pub port: u16,
    /// Name of the credential used to log in
    pub credential: String,
}

/// Login material resolved from a credential reference
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: Option<String>,
    pub identity_file: Option<PathBuf>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("identity_file", &self.identity_file)
            .finish()
    }
}

/// A configuration path: the statement tokens leading to a value
///
/// Paths are whitespace-normalized, so `"interfaces  eth1"` and
/// `"interfaces eth1"` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigPath(String);

impl ConfigPath {
    pub fn new(path: &str) -> Self {
        Self(path.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split(' ').filter(|t| !t.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Path made of the first `depth` tokens
    pub fn truncate(&self, depth: usize) -> Self {
        Self(self.tokens().take(depth).collect::<Vec<_>>().join(" "))
    }

    /// Whether `statement` is this path itself or lies underneath it
    pub fn covers(&self, statement: &str) -> bool {
        statement == self.0
            || (statement.starts_with(&self.0)
                && statement.as_bytes().get(self.0.len()) == Some(&b' '))
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConfigPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Target value for a desired-state item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredValue {
    /// The path must carry exactly this value (empty for presence leaves)
    Value(String),
    /// The path must not be configured
    Absent,
}

/// One declared path and its target value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredStateItem {
    pub path: ConfigPath,
    pub value: DesiredValue,
}

/// Ordered, key-unique desired state for one device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    items: Vec<DesiredStateItem>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from items in declaration order, rejecting repeated keys
    pub fn from_items(
        items: impl IntoIterator<Item = DesiredStateItem>,
    ) -> Result<Self, FleetError> {
        let mut state = Self::new();
        for item in items {
            state.push(item)?;
        }
        Ok(state)
    }

    /// Append an item, rejecting a key that is already declared
    pub fn push(&mut self, item: DesiredStateItem) -> Result<(), FleetError> {
        if self.items.iter().any(|i| i.path == item.path) {
            return Err(FleetError::DuplicateKey {
                path: item.path.to_string(),
            });
        }
        self.items.push(item);
        Ok(())
    }

    /// Insert or replace an item; a replaced item keeps its original position
    pub fn upsert(&mut self, item: DesiredStateItem) {
        match self.items.iter_mut().find(|i| i.path == item.path) {
            Some(existing) => existing.value = item.value,
            None => self.items.push(item),
        }
    }

    /// Declare `path` with `value`
    pub fn set(mut self, path: &str, value: &str) -> Result<Self, FleetError> {
        self.push(DesiredStateItem {
            path: ConfigPath::new(path),
            value: DesiredValue::Value(value.to_string()),
        })?;
        Ok(self)
    }

    /// Declare `path` as absent
    pub fn absent(mut self, path: &str) -> Result<Self, FleetError> {
        self.push(DesiredStateItem {
            path: ConfigPath::new(path),
            value: DesiredValue::Absent,
        })?;
        Ok(self)
    }

    pub fn items(&self) -> &[DesiredStateItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &ConfigPath> {
        self.items.iter().map(|i| &i.path)
    }
}

/// Live configuration observed on a device, as normalized `set` statements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentStateSnapshot {
    statements: BTreeSet<String>,
}

impl CurrentStateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from statements without the leading `set` keyword
    pub fn from_statements<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let statements = statements
            .into_iter()
            .map(|s| ConfigPath::new(s.as_ref()).0)
            .filter(|s| !s.is_empty())
            .collect();
        Self { statements }
    }

    /// Build from path/value pairs, as if each pair were one statement
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::from_statements(pairs.into_iter().map(|(path, value)| {
            if value.is_empty() {
                path.to_string()
            } else {
                format!("{} {}", path, quote_value(value))
            }
        }))
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.statements.iter().map(String::as_str)
    }

    fn under<'a>(&'a self, path: &'a ConfigPath) -> impl Iterator<Item = &'a str> + 'a {
        self.statements
            .range::<str, _>((std::ops::Bound::Included(path.as_str()), std::ops::Bound::Unbounded))
            .take_while(move |s| s.starts_with(path.as_str()))
            .filter(move |s| path.covers(s))
            .map(String::as_str)
    }

    /// Whether the path or anything beneath it is configured
    pub fn is_configured(&self, path: &ConfigPath) -> bool {
        self.under(path).next().is_some()
    }

    fn values_under<'a>(&'a self, path: &'a ConfigPath) -> impl Iterator<Item = String> + 'a {
        self.under(path)
            .map(move |s| unquote(s[path.as_str().len()..].trim_start()))
    }

    /// Observed value at `path`; `None` when not configured
    ///
    /// A bare statement equal to the path yields an empty value. When several
    /// statements sit under the path their values are joined by newlines.
    pub fn value_of(&self, path: &ConfigPath) -> Option<String> {
        let values: Vec<String> = self.values_under(path).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join("\n"))
        }
    }

    /// Whether one of the statements under `path` carries exactly `value`
    ///
    /// A multi-valued leaf (several addresses, several members) holds `value`
    /// when any one of its statements does.
    pub fn has_value(&self, path: &ConfigPath, value: &str) -> bool {
        self.values_under(path).any(|v| v == value)
    }
}

/// A single change operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ChangeOp {
    Set { path: ConfigPath, value: String },
    Delete { path: ConfigPath },
}

impl ChangeOp {
    pub fn path(&self) -> &ConfigPath {
        match self {
            Self::Set { path, .. } | Self::Delete { path } => path,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }

    /// Line-oriented `set`/`delete` statement for this operation
    pub fn render(&self) -> String {
        match self {
            Self::Set { path, value } if value.is_empty() => format!("set {}", path),
            Self::Set { path, value } => format!("set {} {}", path, quote_value(value)),
            Self::Delete { path } => format!("delete {}", path),
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Ordered set of changes moving a device toward its desired state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDelta {
    ops: Vec<ChangeOp>,
}

impl ConfigDelta {
    pub fn new(ops: Vec<ChangeOp>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[ChangeOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn set_count(&self) -> usize {
        self.ops.iter().filter(|op| !op.is_delete()).count()
    }

    pub fn delete_count(&self) -> usize {
        self.ops.iter().filter(|op| op.is_delete()).count()
    }

    /// Paths touched by this delta, in order
    pub fn paths(&self) -> Vec<&ConfigPath> {
        self.ops.iter().map(ChangeOp::path).collect()
    }

    /// One statement per line
    pub fn render_lines(&self) -> Vec<String> {
        self.ops.iter().map(ChangeOp::render).collect()
    }

    /// Text suitable for loading as a staged change set
    pub fn render(&self) -> String {
        self.render_lines().join("\n")
    }

    /// Whether any two operations share a path
    pub fn has_duplicate_paths(&self) -> bool {
        let mut seen = HashSet::new();
        !self.ops.iter().all(|op| seen.insert(op.path()))
    }
}

/// Record of a commit made on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Comment stored in the device's commit history
    pub comment: String,
    pub timestamp: DateTime<Utc>,
    /// Pending-change preview as rendered by the device
    pub diff: String,
    pub items: usize,
    pub sets: usize,
    pub deletes: usize,
}

/// What to do when the current state cannot be read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchFailurePolicy {
    /// Treat the device as having nothing configured and apply everything
    #[default]
    AssumeEmpty,
    /// Fail the device
    Fail,
}

/// Options for applying configuration to a device
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Compute and preview changes without staging them
    pub dry_run: bool,
    /// Bound on connect and per-RPC waits
    pub timeout: Duration,
    pub fetch_failure: FetchFailurePolicy,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            timeout: Duration::from_secs(30),
            fetch_failure: FetchFailurePolicy::AssumeEmpty,
        }
    }
}

/// Quote a value for a `set` statement when it needs it
pub fn quote_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | ';' | '{' | '}' | '#' | '\\'));
    if !needs_quotes {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Undo [`quote_value`] on a value that is a single quoted string
pub fn unquote(value: &str) -> String {
    let value = value.trim();
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .filter(|_| value.len() >= 2)
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_normalizes_whitespace() {
        assert_eq!(
            ConfigPath::new("  interfaces   eth1 unit 0 "),
            ConfigPath::new("interfaces eth1 unit 0")
        );
    }

    #[test]
    fn test_config_path_covers_respects_token_boundary() {
        let path = ConfigPath::new("interfaces eth1");
        assert!(path.covers("interfaces eth1"));
        assert!(path.covers("interfaces eth1 unit 0 description x"));
        assert!(!path.covers("interfaces eth10 unit 0 description x"));
        assert!(!path.covers("interfaces"));
    }

    #[test]
    fn test_desired_state_rejects_duplicates() {
        let result = DesiredState::new()
            .set("interfaces eth1 unit 0 description", "a")
            .and_then(|s| s.absent("interfaces  eth1 unit 0 description"));
        assert!(matches!(result, Err(FleetError::DuplicateKey { .. })));
    }

    #[test]
    fn test_desired_state_upsert_keeps_position() {
        let mut state = DesiredState::new().set("a", "1").unwrap().set("b", "2").unwrap();
        state.upsert(DesiredStateItem {
            path: "a".into(),
            value: DesiredValue::Absent,
        });
        let paths: Vec<_> = state.paths().map(ConfigPath::as_str).collect();
        assert_eq!(paths, ["a", "b"]);
        assert_eq!(state.items()[0].value, DesiredValue::Absent);
    }

    #[test]
    fn test_snapshot_value_of_unquotes() {
        let snapshot = CurrentStateSnapshot::from_statements([
            r#"interfaces eth1 unit 0 description "PE1 eth1 <-> PE3 eth1""#,
            "interfaces eth10 unit 0 description other",
        ]);
        assert_eq!(
            snapshot.value_of(&"interfaces eth1 unit 0 description".into()),
            Some("PE1 eth1 <-> PE3 eth1".to_string())
        );
        assert_eq!(snapshot.value_of(&"interfaces eth2 unit 0 description".into()), None);
    }

    #[test]
    fn test_snapshot_multi_valued_leaf() {
        let snapshot = CurrentStateSnapshot::from_statements([
            "interfaces eth1 unit 0 family inet address 10.0.0.1/30",
            "interfaces eth1 unit 0 family inet address 10.0.0.5/30",
        ]);
        let path: ConfigPath = "interfaces eth1 unit 0 family inet address".into();
        assert!(snapshot.has_value(&path, "10.0.0.1/30"));
        assert!(snapshot.has_value(&path, "10.0.0.5/30"));
        assert!(!snapshot.has_value(&path, "10.0.0.9/30"));
        assert!(!snapshot.has_value(&path, "10.0.0.1/30\n10.0.0.5/30"));
        assert_eq!(
            snapshot.value_of(&path).as_deref(),
            Some("10.0.0.1/30\n10.0.0.5/30")
        );
    }

    #[test]
    fn test_snapshot_presence_and_subtree() {
        let snapshot = CurrentStateSnapshot::from_statements([
            "protocols isis interface eth1.0 level 2 metric 10",
            "protocols isis overload",
        ]);
        assert!(snapshot.is_configured(&"protocols isis".into()));
        assert!(!snapshot.is_configured(&"protocols ospf".into()));
        assert_eq!(
            snapshot.value_of(&"protocols isis overload".into()),
            Some(String::new())
        );
    }

    #[test]
    fn test_snapshot_from_pairs_round_trips_values() {
        let snapshot = CurrentStateSnapshot::from_pairs([("eth1", "A<->B"), ("lo0", "Loop back")]);
        assert_eq!(snapshot.value_of(&"eth1".into()), Some("A<->B".to_string()));
        assert_eq!(snapshot.value_of(&"lo0".into()), Some("Loop back".to_string()));
    }

    #[test]
    fn test_change_op_render() {
        let set = ChangeOp::Set {
            path: "interfaces eth1 unit 0 description".into(),
            value: "PE1 \"core\" link".to_string(),
        };
        assert_eq!(
            set.render(),
            r#"set interfaces eth1 unit 0 description "PE1 \"core\" link""#
        );
        let presence = ChangeOp::Set {
            path: "protocols isis overload".into(),
            value: String::new(),
        };
        assert_eq!(presence.render(), "set protocols isis overload");
        let delete = ChangeOp::Delete {
            path: "protocols isis".into(),
        };
        assert_eq!(delete.render(), "delete protocols isis");
    }

    #[test]
    fn test_delta_counts() {
        let delta = ConfigDelta::new(vec![
            ChangeOp::Set {
                path: "a".into(),
                value: "1".into(),
            },
            ChangeOp::Delete { path: "b".into() },
        ]);
        assert_eq!(delta.set_count(), 1);
        assert_eq!(delta.delete_count(), 1);
        assert_eq!(delta.render(), "set a 1\ndelete b");
        assert!(!delta.has_duplicate_paths());
    }

    #[test]
    fn test_quote_value() {
        assert_eq!(quote_value("10m"), "10m");
        assert_eq!(quote_value("two words"), "\"two words\"");
        assert_eq!(quote_value(r"back\slash"), r#""back\\slash""#);
    }

    #[test]
    fn test_unquote_leaves_plain_values() {
        assert_eq!(unquote("notice"), "notice");
        assert_eq!(unquote("\""), "\"");
        assert_eq!(unquote(r#""a \"b\"""#), "a \"b\"");
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let cred = Credential {
            username: "josemi".into(),
            password: Some("secret".into()),
            identity_file: None,
        };
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }
}
