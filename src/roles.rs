//! Roles from the fleet file as desired-state providers
//!
//! A role holds items for every device (`all`) and per-device items. A
//! per-device item overrides an `all` item with the same path in place, so
//! declaration order is kept.
//!
//! Item values:
//!
//! ```toml
//! "system syslog archive size" = "10m"      # value
//! "protocols isis overload timeout" = 3600  # numbers are rendered as-is
//! "interfaces eth1 unit 0 family iso" = true # presence leaf
//! "protocols isis" = { absent = true }      # must not be configured
//! ```

use crate::config::RoleConfig;
use anyhow::{Result, bail};
use reconcile::{
    ConfigPath, DesiredState, DesiredStateItem, DesiredStateProvider, DesiredValue, Scope,
};
use std::collections::BTreeMap;

/// A role whose desired state comes from the fleet file
#[derive(Debug)]
pub struct TomlRole {
    name: String,
    purpose: String,
    credential: Option<String>,
    scope: Option<Vec<ConfigPath>>,
    states: BTreeMap<String, DesiredState>,
    shared: DesiredState,
}

impl TomlRole {
    /// Resolve a role's items for every device it mentions
    pub fn from_config(name: &str, config: &RoleConfig) -> Result<Self> {
        let shared = items(&config.all)
            .and_then(|items| Ok(DesiredState::from_items(items)?))
            .map_err(|e| anyhow::anyhow!("role '{}': {}", name, e))?;

        let mut states = BTreeMap::new();
        for (device, table) in &config.devices {
            let mut state = shared.clone();
            let own = items(table)
                .and_then(|items| Ok(DesiredState::from_items(items)?))
                .map_err(|e| anyhow::anyhow!("role '{}', device '{}': {}", name, device, e))?;
            for item in own.items() {
                state.upsert(item.clone());
            }
            states.insert(device.clone(), state);
        }

        let scope = config
            .scope
            .as_ref()
            .map(|roots| roots.iter().map(|r| ConfigPath::new(r)).collect());

        Ok(Self {
            name: name.to_string(),
            purpose: config.purpose.clone().unwrap_or_else(|| name.to_string()),
            credential: config.credential.clone(),
            scope,
            states,
            shared,
        })
    }

    /// Devices with their own items
    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    /// Number of items applied to every device
    pub fn shared_items(&self) -> usize {
        self.shared.len()
    }
}

fn items(table: &toml::Table) -> Result<Vec<DesiredStateItem>> {
    table
        .iter()
        .map(|(path, value)| {
            let path = ConfigPath::new(path);
            if path.is_empty() {
                bail!("empty configuration path");
            }
            Ok(DesiredStateItem {
                value: desired_value(&path, value)?,
                path,
            })
        })
        .collect()
}

fn desired_value(path: &ConfigPath, value: &toml::Value) -> Result<DesiredValue> {
    Ok(match value {
        toml::Value::String(s) => DesiredValue::Value(s.clone()),
        toml::Value::Integer(i) => DesiredValue::Value(i.to_string()),
        toml::Value::Float(f) => DesiredValue::Value(f.to_string()),
        toml::Value::Boolean(true) => DesiredValue::Value(String::new()),
        toml::Value::Table(t)
            if t.len() == 1 && t.get("absent") == Some(&toml::Value::Boolean(true)) =>
        {
            DesiredValue::Absent
        }
        toml::Value::Boolean(false) => {
            bail!("'{}': use {{ absent = true }} to remove a statement", path)
        }
        other => bail!("'{}': unsupported value {}", path, other),
    })
}

impl DesiredStateProvider for TomlRole {
    fn name(&self) -> &str {
        &self.name
    }

    fn purpose(&self) -> &str {
        &self.purpose
    }

    fn desired_state(&self, device: &str) -> DesiredState {
        self.states
            .get(device)
            .unwrap_or(&self.shared)
            .clone()
    }

    fn credential_override(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    fn scope(&self, _device: &str, desired: &DesiredState) -> Scope {
        match &self.scope {
            Some(roots) => Scope::from_roots(roots.iter().cloned()),
            None => Scope::for_desired(desired),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;

    const ISIS: &str = r#"
[credentials.lab]
username = "josemi"

[devices.pe1]
host = "pe1"
credential = "lab"

[devices.pe5]
host = "pe5"
credential = "lab"

[roles.isis]
purpose = "ISIS protocol changes"
credential = "lab"

[roles.isis.all]
"protocols isis interface eth1.0 point-to-point" = true
"protocols isis level 2 wide-metrics-only" = true
"protocols isis overload timeout" = 3600

[roles.isis.devices.pe1]
"protocols isis overload timeout" = 600
"protocols isis interface lo0.0 passive" = true

[roles.isis.devices.pe5]
"protocols isis" = { absent = true }
"#;

    fn isis() -> TomlRole {
        let config = FleetConfig::parse(ISIS).unwrap();
        TomlRole::from_config("isis", config.role("isis").unwrap()).unwrap()
    }

    #[test]
    fn test_device_items_override_in_place() {
        let role = isis();
        let state = role.desired_state("pe1");
        let items: Vec<_> = state
            .items()
            .iter()
            .map(|i| (i.path.as_str(), i.value.clone()))
            .collect();
        assert_eq!(
            items,
            vec![
                (
                    "protocols isis interface eth1.0 point-to-point",
                    DesiredValue::Value(String::new())
                ),
                (
                    "protocols isis level 2 wide-metrics-only",
                    DesiredValue::Value(String::new())
                ),
                (
                    "protocols isis overload timeout",
                    DesiredValue::Value("600".into())
                ),
                (
                    "protocols isis interface lo0.0 passive",
                    DesiredValue::Value(String::new())
                ),
            ]
        );
    }

    #[test]
    fn test_absent_marker() {
        let role = isis();
        let state = role.desired_state("pe5");
        assert_eq!(state.len(), 4);
        assert_eq!(state.items()[3].value, DesiredValue::Absent);
        assert_eq!(state.items()[3].path.as_str(), "protocols isis");
    }

    #[test]
    fn test_devices_without_own_items_get_shared_items() {
        let role = isis();
        assert_eq!(role.desired_state("pe3").len(), 3);
        assert_eq!(role.shared_items(), 3);
        assert_eq!(role.devices().collect::<Vec<_>>(), ["pe1", "pe5"]);
    }

    #[test]
    fn test_purpose_and_credential() {
        let role = isis();
        assert_eq!(role.name(), "isis");
        assert_eq!(role.purpose(), "ISIS protocol changes");
        assert_eq!(role.credential_override(), Some("lab"));
    }

    #[test]
    fn test_explicit_scope() {
        let config = RoleConfig {
            scope: Some(vec!["system syslog".into()]),
            ..RoleConfig::default()
        };
        let role = TomlRole::from_config("syslog", &config).unwrap();
        let scope = role.scope("pe1", &DesiredState::new());
        assert!(scope.contains("system syslog archive size 10m"));
        assert!(!scope.contains("system host-name pe1"));
    }

    #[test]
    fn test_derived_scope() {
        let role = isis();
        let desired = role.desired_state("pe1");
        let scope = role.scope("pe1", &desired);
        assert!(!scope.is_empty());
        assert!(scope.contains("protocols isis overload timeout 600"));
    }

    #[test]
    fn test_whitespace_variants_collide() {
        let mut all = toml::Table::new();
        all.insert("system  syslog".into(), toml::Value::String("a".into()));
        all.insert("system syslog".into(), toml::Value::String("b".into()));
        let config = RoleConfig {
            all,
            ..RoleConfig::default()
        };
        let err = TomlRole::from_config("syslog", &config).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_false_is_rejected() {
        let mut all = toml::Table::new();
        all.insert("protocols isis".into(), toml::Value::Boolean(false));
        let config = RoleConfig {
            all,
            ..RoleConfig::default()
        };
        let err = TomlRole::from_config("isis", &config).unwrap_err();
        assert!(err.to_string().contains("absent = true"));
    }
}
