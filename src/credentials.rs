//! Credential references resolved from the fleet file and the environment

use crate::config::CredentialConfig;
use crate::paths;
use reconcile::{Credential, CredentialProvider, DeviceError};
use std::collections::BTreeMap;

/// Resolves references against `[credentials.*]`
///
/// Passwords are never stored in the fleet file; each credential names the
/// environment variable that holds it.
pub struct ConfigCredentials {
    credentials: BTreeMap<String, CredentialConfig>,
}

impl ConfigCredentials {
    pub fn new(credentials: BTreeMap<String, CredentialConfig>) -> Self {
        Self { credentials }
    }
}

impl CredentialProvider for ConfigCredentials {
    fn resolve(&self, reference: &str) -> Result<Credential, DeviceError> {
        let config = self
            .credentials
            .get(reference)
            .ok_or_else(|| DeviceError::connection(format!("unknown credential '{}'", reference)))?;

        let password = match &config.password_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                DeviceError::connection(format!(
                    "credential '{}': environment variable {} is not set",
                    reference, var
                ))
            })?),
            None => None,
        };

        Ok(Credential {
            username: config.username.clone(),
            password,
            identity_file: config.identity_file.as_deref().map(paths::expand),
        })
    }
}
