//! In-memory devices for tests
//!
//! [`ScriptedDevice`] keeps a running and a candidate configuration as `set`
//! statements and applies loaded `set`/`delete` text to them, so tests can
//! assert on device state rather than on call sequences alone.

use crate::context::{CredentialProvider, DesiredStateProvider};
use crate::error::{DeviceError, Result};
use crate::fetch::Scope;
use crate::session::{CommitStatus, Connector, Reply, Request, Transport};
use crate::types::{
    ChangeOp, ConfigDelta, ConfigPath, Credential, CurrentStateSnapshot, DesiredState, Device,
    quote_value, unquote,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub fn device(name: &str) -> Device {
    Device {
        name: name.to_string(),
        host: format!("{}.lab.example", name),
        port: 830,
        credential: "ops".to_string(),
    }
}

/// Apply a delta to a snapshot the way a device would
pub fn apply_delta(snapshot: &CurrentStateSnapshot, delta: &ConfigDelta) -> CurrentStateSnapshot {
    let mut statements: Vec<String> = snapshot.statements().map(str::to_string).collect();
    for op in delta.ops() {
        statements.retain(|s| !op.path().covers(s));
        if let ChangeOp::Set { path, value } = op {
            if value.is_empty() {
                statements.push(path.to_string());
            } else {
                statements.push(format!("{} {}", path, quote_value(value)));
            }
        }
    }
    CurrentStateSnapshot::from_statements(statements)
}

/// Parse one line of loaded change text
fn parse_change_line(line: &str) -> Option<ChangeOp> {
    let line = line.trim();
    if let Some(path) = line.strip_prefix("delete ") {
        return Some(ChangeOp::Delete { path: path.into() });
    }
    let rest = line.strip_prefix("set ")?;
    let (path, value) = match rest.find(" \"") {
        Some(i) => (&rest[..i], unquote(&rest[i + 1..])),
        None => match rest.rsplit_once(' ') {
            Some((path, value)) => (path, value.to_string()),
            None => (rest, String::new()),
        },
    };
    Some(ChangeOp::Set {
        path: ConfigPath::new(path),
        value,
    })
}

struct State {
    running: CurrentStateSnapshot,
    candidate: Option<CurrentStateSnapshot>,
    requests: Vec<String>,
    failures: HashMap<String, DeviceError>,
    refuse_connection: bool,
    panic_on_connect: bool,
    empty_diff: bool,
    commit_status: CommitStatus,
    open_sessions: usize,
    closes: usize,
    commits: usize,
}

/// A fake device shared between a test and the transports opened to it
#[derive(Clone)]
pub struct ScriptedDevice {
    name: String,
    state: Arc<Mutex<State>>,
}

impl ScriptedDevice {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(State {
                running: CurrentStateSnapshot::new(),
                candidate: None,
                requests: Vec::new(),
                failures: HashMap::new(),
                refuse_connection: false,
                panic_on_connect: false,
                empty_diff: false,
                commit_status: CommitStatus::Committed,
                open_sessions: 0,
                closes: 0,
                commits: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Seed the running configuration (statements without `set`)
    pub fn with_config<'a>(self, statements: impl IntoIterator<Item = &'a str>) -> Self {
        self.state().running = CurrentStateSnapshot::from_statements(statements);
        self
    }

    pub fn refuse_connection(self) -> Self {
        self.state().refuse_connection = true;
        self
    }

    pub fn panic_on_connect(self) -> Self {
        self.state().panic_on_connect = true;
        self
    }

    /// Fail every request with this name
    pub fn fail_on(self, request: &str, error: DeviceError) -> Self {
        self.state().failures.insert(request.to_string(), error);
        self
    }

    pub fn with_empty_diff(self) -> Self {
        self.state().empty_diff = true;
        self
    }

    pub fn with_commit_status(self, status: CommitStatus) -> Self {
        self.state().commit_status = status;
        self
    }

    /// Open a transport directly, bypassing the connector
    pub fn transport(&self) -> Box<dyn Transport> {
        self.state().open_sessions += 1;
        Box::new(ScriptedTransport {
            state: Arc::clone(&self.state),
        })
    }

    pub fn config(&self) -> Vec<String> {
        self.state().running.statements().map(str::to_string).collect()
    }

    pub fn requests(&self) -> Vec<String> {
        self.state().requests.clone()
    }

    pub fn requested(&self, name: &str) -> bool {
        self.count_requests(name) > 0
    }

    pub fn count_requests(&self, name: &str) -> usize {
        self.state().requests.iter().filter(|r| *r == name).count()
    }

    pub fn commit_count(&self) -> usize {
        self.state().commits
    }

    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    pub fn close_count(&self) -> usize {
        self.state().closes
    }
}

struct ScriptedTransport {
    state: Arc<Mutex<State>>,
}

impl Transport for ScriptedTransport {
    fn execute(&mut self, request: &Request) -> Result<Reply> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.name().to_string());
        if let Some(error) = state.failures.get(request.name()) {
            return Err(error.clone());
        }

        match request {
            Request::GetConfiguration { scope } => {
                let text = render_scoped(&state.running, scope);
                Ok(Reply::Config(text))
            }
            Request::Lock | Request::Unlock => Ok(Reply::Ack),
            Request::LoadConfiguration { text } => {
                let base = state.candidate.take().unwrap_or_else(|| state.running.clone());
                let ops = text.lines().filter_map(parse_change_line).collect();
                state.candidate = Some(apply_delta(&base, &ConfigDelta::new(ops)));
                Ok(Reply::Ack)
            }
            Request::Diff => {
                if state.empty_diff {
                    return Ok(Reply::Diff(None));
                }
                let Some(candidate) = &state.candidate else {
                    return Ok(Reply::Diff(None));
                };
                let removed = state
                    .running
                    .statements()
                    .filter(|s| !candidate.statements().any(|c| c == *s))
                    .map(|s| format!("- {}", s));
                let added = candidate
                    .statements()
                    .filter(|s| !state.running.statements().any(|r| r == *s))
                    .map(|s| format!("+ {}", s));
                let lines: Vec<String> = removed.chain(added).collect();
                Ok(Reply::Diff((!lines.is_empty()).then(|| lines.join("\n"))))
            }
            Request::Commit { .. } => {
                if let Some(candidate) = state.candidate.take() {
                    state.running = candidate;
                }
                state.commits += 1;
                Ok(Reply::Commit(state.commit_status))
            }
            Request::Discard => {
                state.candidate = None;
                Ok(Reply::Ack)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.open_sessions -= 1;
        state.closes += 1;
        Ok(())
    }
}

fn render_scoped(running: &CurrentStateSnapshot, scope: &Scope) -> String {
    running
        .statements()
        .filter(|s| scope.contains(s))
        .map(|s| format!("set {}", s))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Connector resolving devices by name
#[derive(Default)]
pub struct ScriptedConnector {
    devices: Mutex<HashMap<String, ScriptedDevice>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, device: ScriptedDevice) {
        self.devices
            .lock()
            .unwrap()
            .insert(device.name().to_string(), device);
    }
}

impl Connector for ScriptedConnector {
    fn connect(
        &self,
        device: &Device,
        _credential: &Credential,
        _timeout: Duration,
    ) -> Result<Box<dyn Transport>> {
        let scripted = self
            .devices
            .lock()
            .unwrap()
            .get(&device.name)
            .cloned()
            .ok_or_else(|| DeviceError::connection(format!("no route to host {}", device.host)))?;

        let (refuse, panic) = {
            let state = scripted.state();
            (state.refuse_connection, state.panic_on_connect)
        };
        if panic {
            panic!("transport crashed for {}", device.name);
        }
        if refuse {
            return Err(DeviceError::connection("connection refused"));
        }
        Ok(scripted.transport())
    }
}

/// Desired state from a fixed per-device table
pub struct StaticRole {
    name: String,
    states: HashMap<String, DesiredState>,
}

impl StaticRole {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            states: HashMap::new(),
        }
    }

    pub fn with(mut self, device: &str, state: DesiredState) -> Self {
        self.states.insert(device.to_string(), state);
        self
    }
}

impl DesiredStateProvider for StaticRole {
    fn name(&self) -> &str {
        &self.name
    }

    fn desired_state(&self, device: &str) -> DesiredState {
        self.states.get(device).cloned().unwrap_or_default()
    }
}

/// Credentials that resolve every reference except the listed ones
#[derive(Default)]
pub struct StaticCredentials {
    missing: Vec<String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without(mut self, reference: &str) -> Self {
        self.missing.push(reference.to_string());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn resolve(&self, reference: &str) -> std::result::Result<Credential, DeviceError> {
        if self.missing.iter().any(|m| m == reference) {
            return Err(DeviceError::connection(format!(
                "unknown credential '{}'",
                reference
            )));
        }
        Ok(Credential {
            username: reference.to_string(),
            password: None,
            identity_file: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_change_line() {
        assert_eq!(
            parse_change_line(r#"set interfaces eth1 unit 0 description "A <-> B""#),
            Some(ChangeOp::Set {
                path: "interfaces eth1 unit 0 description".into(),
                value: "A <-> B".into(),
            })
        );
        assert_eq!(
            parse_change_line("set system syslog archive size 10m"),
            Some(ChangeOp::Set {
                path: "system syslog archive size".into(),
                value: "10m".into(),
            })
        );
        assert_eq!(
            parse_change_line("delete protocols isis"),
            Some(ChangeOp::Delete {
                path: "protocols isis".into()
            })
        );
        assert_eq!(parse_change_line("## comment"), None);
    }
}
