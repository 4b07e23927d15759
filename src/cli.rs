use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleetcfg")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge network devices to a declared configuration", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Fleet file (default: $FLEETCFG_CONFIG or ~/.config/fleetcfg/fleet.toml)
    #[arg(short, long, global = true, env = "FLEETCFG_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply a role to the fleet
    Apply(ApplyArgs),

    /// Show devices, credentials and roles from the fleet file
    List,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Role to apply
    #[arg(short, long)]
    pub role: String,

    /// Show what would change without staging anything
    #[arg(short, long)]
    pub dry_run: bool,

    /// Only these devices (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub devices: Vec<String>,

    /// Devices processed at once (overrides settings.jobs)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Seconds between devices (overrides settings.pacing)
    #[arg(long)]
    pub pace_secs: Option<f64>,

    /// Fail a device when its current configuration cannot be read
    #[arg(long)]
    pub strict_fetch: bool,

    /// Print the fleet report as JSON
    #[arg(long)]
    pub json: bool,
}

impl ApplyArgs {
    /// Requested devices, `None` meaning the whole inventory
    pub fn targets(&self) -> Option<Vec<String>> {
        let targets: Vec<String> = self
            .devices
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        (!targets.is_empty()).then_some(targets)
    }
}
