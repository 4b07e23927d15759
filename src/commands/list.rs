//! `fleetcfg list`: what the fleet file declares

use anyhow::Result;
use colored::Colorize;
use reconcile::DesiredStateProvider;
use std::path::Path;

use crate::Context;
use crate::config::{CredentialConfig, FleetConfig};
use crate::paths;
use crate::roles::TomlRole;
use crate::ui;

pub fn run(ctx: &Context, config: Option<&Path>) -> Result<()> {
    let path = paths::fleet_file(config)?;
    let fleet = FleetConfig::load(&path)?;

    if !ctx.quiet {
        ui::header(&format!("Fleet file {}", path.display()));
    }

    ui::section(&format!("Devices ({})", fleet.devices.len()));
    for device in fleet.inventory().devices() {
        println!(
            "  {} {}:{} {}",
            device.name.bold(),
            device.host,
            device.port,
            format!("[{}]", device.credential).dimmed()
        );
    }

    ui::section(&format!("Credentials ({})", fleet.credentials.len()));
    for (name, credential) in &fleet.credentials {
        ui::kv(name, &describe_credential(credential));
    }

    ui::section(&format!("Roles ({})", fleet.roles.len()));
    for (name, config) in &fleet.roles {
        match TomlRole::from_config(name, config) {
            Ok(role) => {
                let own: Vec<&str> = role.devices().collect();
                println!("  {} {}", name.bold(), role.purpose().dimmed());
                ui::dim(&format!(
                    "{} shared item(s); own items for: {}",
                    role.shared_items(),
                    if own.is_empty() {
                        "none".to_string()
                    } else {
                        own.join(", ")
                    }
                ));
            }
            Err(e) => ui::error(&format!("{}: {:#}", name, e)),
        }
    }
    Ok(())
}

fn describe_credential(credential: &CredentialConfig) -> String {
    let auth = match (&credential.password_env, &credential.identity_file) {
        (Some(var), _) => format!("password from ${}", var),
        (None, Some(key)) => format!("key {}", key),
        (None, None) => "ssh agent".to_string(),
    };
    format!("{} ({})", credential.username, auth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_credential() {
        let mut credential = CredentialConfig {
            username: "josemi".into(),
            password_env: Some("LAB_PASSWORD".into()),
            identity_file: None,
        };
        assert_eq!(
            describe_credential(&credential),
            "josemi (password from $LAB_PASSWORD)"
        );
        credential.password_env = None;
        assert_eq!(describe_credential(&credential), "josemi (ssh agent)");
        credential.identity_file = Some("~/.ssh/lab".into());
        assert_eq!(describe_credential(&credential), "josemi (key ~/.ssh/lab)");
    }

    #[test]
    fn test_list_reads_fleet_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(
            &path,
            "[credentials.lab]\nusername = \"josemi\"\n\n[devices.pe1]\nhost = \"pe1\"\ncredential = \"lab\"\n",
        )
        .unwrap();
        let ctx = Context {
            verbose: 0,
            quiet: true,
        };
        run(&ctx, Some(&path)).unwrap();
    }
}
