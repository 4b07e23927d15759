//! `fleetcfg apply`: converge the fleet to a role

use anyhow::{Context as AnyhowContext, Result};
use reconcile::{
    ApplyOptions, CancelFlag, DesiredStateProvider, FetchFailurePolicy, FleetObserver,
    FleetOrchestrator, FleetReport, NoObserver,
};
use std::path::Path;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::config::{FleetConfig, PacingConfig, Settings};
use crate::connector::NetconfConnector;
use crate::credentials::ConfigCredentials;
use crate::interrupt;
use crate::observer::ConsoleObserver;
use crate::paths;
use crate::roles::TomlRole;
use crate::ui;

/// Run settings after command-line overrides
#[derive(Debug)]
struct RunPlan {
    options: ApplyOptions,
    jobs: usize,
    pacing: PacingConfig,
}

fn plan(settings: &Settings, args: &ApplyArgs) -> RunPlan {
    let fetch_failure = if args.strict_fetch {
        FetchFailurePolicy::Fail
    } else {
        settings.fetch_failure
    };
    RunPlan {
        options: ApplyOptions {
            dry_run: args.dry_run,
            timeout: settings.timeout(),
            fetch_failure,
        },
        jobs: args.jobs.unwrap_or(settings.jobs).max(1),
        pacing: args
            .pace_secs
            .map_or_else(|| settings.pacing.clone(), |secs| PacingConfig::Interval { secs }),
    }
}

/// Apply a role; the report says whether the run was interrupted
pub fn run(ctx: &Context, config: Option<&Path>, args: &ApplyArgs) -> Result<FleetReport> {
    let path = paths::fleet_file(config)?;
    log::info!("Using fleet file {}", path.display());
    let fleet = FleetConfig::load(&path)?;

    let role = TomlRole::from_config(&args.role, fleet.role(&args.role)?)?;
    let plan = plan(&fleet.settings, args);
    log::debug!("Run plan: {:?}", plan);

    let connector = NetconfConnector::new(fleet.settings.ssh_program.clone());
    let credentials = ConfigCredentials::new(fleet.credentials.clone());

    let cancel = CancelFlag::new();
    interrupt::set_up_process_interrupt_handler(&cancel)?;

    let orchestrator = FleetOrchestrator::new(&connector, &credentials)
        .with_options(plan.options)
        .with_pacing(plan.pacing.policy())
        .with_jobs(plan.jobs)
        .with_cancel(cancel);

    let mut console = ConsoleObserver::new(
        role.name(),
        role.purpose(),
        ctx.verbose > 0,
        ctx.quiet,
    );
    let mut silent = NoObserver;
    let observer: &mut dyn FleetObserver = if args.json { &mut silent } else { &mut console };

    let targets = args.targets();
    let report = orchestrator
        .run(&fleet.inventory(), &role, targets.as_deref(), observer)
        .with_context(|| format!("Could not run role '{}'", role.name()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.interrupted && !ctx.quiet {
        ui::warn("Run interrupted");
    }
    Ok(report)
}
