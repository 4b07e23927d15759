//! Fleet file: settings, credentials, devices and roles in one TOML document

use anyhow::{Context, Result, bail};
use reconcile::{
    Device, FetchFailurePolicy, Interval, Inventory, NoPacing, PacingPolicy, TokenBucket,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FleetConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub credentials: BTreeMap<String, CredentialConfig>,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Bound on connecting and on each RPC
    pub timeout_secs: u64,
    /// Devices processed at once
    pub jobs: usize,
    pub fetch_failure: FetchFailurePolicy,
    /// ssh client used for NETCONF sessions
    pub ssh_program: String,
    pub pacing: PacingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            jobs: 1,
            fetch_failure: FetchFailurePolicy::default(),
            ssh_program: "ssh".to_string(),
            pacing: PacingConfig::default(),
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// How devices are spaced out during a run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PacingConfig {
    /// Fixed gap between devices
    Interval {
        #[serde(default = "default_pace_secs")]
        secs: f64,
    },
    /// Bursts of `capacity` devices, one more every `refill_secs`
    TokenBucket { capacity: u32, refill_secs: f64 },
    None,
}

fn default_pace_secs() -> f64 {
    2.0
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self::Interval {
            secs: default_pace_secs(),
        }
    }
}

impl PacingConfig {
    pub fn policy(&self) -> Box<dyn PacingPolicy> {
        match self {
            Self::Interval { secs } => Box::new(Interval::new(seconds(*secs))),
            Self::TokenBucket {
                capacity,
                refill_secs,
            } => Box::new(TokenBucket::new(*capacity, seconds(*refill_secs))),
            Self::None => Box::new(NoPacing),
        }
    }
}

fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialConfig {
    pub username: String,
    /// Environment variable holding the password
    #[serde(default)]
    pub password_env: Option<String>,
    /// Private key, `~` and `$VARS` expanded
    #[serde(default)]
    pub identity_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub credential: String,
}

fn default_port() -> u16 {
    830
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleConfig {
    /// Shown in output and recorded in commit comments
    #[serde(default)]
    pub purpose: Option<String>,
    /// Connect with this credential instead of each device's own
    #[serde(default)]
    pub credential: Option<String>,
    /// Explicit read scope; derived from the items when absent
    #[serde(default)]
    pub scope: Option<Vec<String>>,
    /// Items for every device, in declaration order
    #[serde(default)]
    pub all: toml::Table,
    /// Per-device items, overriding `all`
    #[serde(default)]
    pub devices: BTreeMap<String, toml::Table>,
}

impl FleetConfig {
    /// Load and validate a fleet file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid fleet file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, device) in &self.devices {
            if !self.credentials.contains_key(&device.credential) {
                bail!(
                    "device '{}' uses unknown credential '{}'",
                    name,
                    device.credential
                );
            }
        }
        for (name, role) in &self.roles {
            if let Some(credential) = &role.credential {
                if !self.credentials.contains_key(credential) {
                    bail!("role '{}' uses unknown credential '{}'", name, credential);
                }
            }
            for device in role.devices.keys() {
                if !self.devices.contains_key(device) {
                    bail!("role '{}' has items for unknown device '{}'", name, device);
                }
            }
        }
        if let PacingConfig::TokenBucket { capacity: 0, .. } = self.settings.pacing {
            bail!("settings.pacing.capacity must be at least 1");
        }
        Ok(())
    }

    /// Devices as the engine sees them
    pub fn inventory(&self) -> Inventory {
        Inventory::from_devices(self.devices.iter().map(|(name, d)| Device {
            name: name.clone(),
            host: d.host.clone(),
            port: d.port,
            credential: d.credential.clone(),
        }))
    }

    pub fn role(&self, name: &str) -> Result<&RoleConfig> {
        self.roles.get(name).with_context(|| {
            let known: Vec<_> = self.roles.keys().map(String::as_str).collect();
            format!(
                "Unknown role '{}' (known: {})",
                name,
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            )
        })
    }
}
