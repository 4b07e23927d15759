//! Console progress and summary for fleet runs

use crate::ui;
use colored::Colorize;
use reconcile::{
    ChangeOp, Device, FleetObserver, FleetReport, Outcome, ProvisioningResult, UnchangedReason,
};

/// Prints per-device progress and the final summary
pub struct ConsoleObserver {
    role: String,
    purpose: String,
    verbose: bool,
    quiet: bool,
    total: usize,
}

impl ConsoleObserver {
    pub fn new(role: &str, purpose: &str, verbose: bool, quiet: bool) -> Self {
        Self {
            role: role.to_string(),
            purpose: purpose.to_string(),
            verbose,
            quiet,
            total: 0,
        }
    }

    fn print_preview(&self, ops: &[ChangeOp]) {
        for op in ops {
            if op.is_delete() {
                ui::danger(&op.render());
            } else {
                println!("    {}", op.render().green());
            }
        }
    }
}

/// One-line status for a finished device
pub fn describe(result: &ProvisioningResult) -> String {
    let warning = if result.fetch_warning.is_some() {
        " (current state unreadable, assumed empty)"
    } else {
        ""
    };
    match &result.outcome {
        Outcome::Unchanged {
            reason: UnchangedReason::InSync,
        } => format!("{}: already in desired state", result.device),
        Outcome::Unchanged {
            reason: UnchangedReason::DeviceReportedNoDiff,
        } => format!("{}: no changes needed{}", result.device, warning),
        Outcome::Previewed { delta, .. } => format!(
            "{}: would apply {} item(s) ({} set, {} delete){}",
            result.device,
            delta.len(),
            delta.set_count(),
            delta.delete_count(),
            warning
        ),
        Outcome::Committed { record, no_effect } => format!(
            "{}: committed {} item(s) ({} set, {} delete){}{}",
            result.device,
            record.items,
            record.sets,
            record.deletes,
            if *no_effect { ", device reported no effect" } else { "" },
            warning
        ),
        Outcome::Failed { error, during } => format!(
            "{}: {} after {:?}: {}",
            result.device,
            error.kind.label(),
            during,
            error.message
        ),
    }
}

impl FleetObserver for ConsoleObserver {
    fn on_run_start(&mut self, devices: &[&Device], dry_run: bool) {
        self.total = devices.len();
        if self.quiet {
            return;
        }
        ui::header(&format!("{} ({})", self.purpose, self.role));
        ui::kv("Devices", &self.total.to_string());
        if dry_run {
            ui::kv("Mode", "DRY RUN");
            ui::info("No changes will be staged or committed");
        } else {
            ui::kv("Mode", &"LIVE EXECUTION".red().bold().to_string());
            ui::warn("Changes will be committed to the devices");
        }
    }

    fn on_device_start(&mut self, index: usize, total: usize, device: &Device) {
        if self.quiet {
            return;
        }
        println!();
        ui::step(
            index + 1,
            total,
            &format!("{} ({}:{})", device.name.bold(), device.host, device.port),
        );
    }

    fn on_device_complete(&mut self, result: &ProvisioningResult) {
        let line = describe(result);
        match &result.outcome {
            Outcome::Failed { .. } => ui::error(&line),
            _ if self.quiet => {}
            Outcome::Unchanged { .. } => ui::success(&line),
            Outcome::Previewed { delta, .. } => {
                ui::info(&line);
                self.print_preview(delta.ops());
            }
            Outcome::Committed { record, .. } => {
                ui::success(&line);
                if record.deletes > 0 {
                    ui::danger(&format!("{} statement(s) deleted", record.deletes));
                }
                if !record.diff.is_empty() {
                    ui::diff(&record.diff, self.verbose);
                }
                if self.verbose {
                    ui::dim(&format!("comment: {}", record.comment));
                }
            }
        }
        if let Some(warning) = &result.fetch_warning {
            if !self.quiet {
                ui::warn(&format!("{}: {}", result.device, warning));
            }
        }
        if self.verbose && !self.quiet {
            ui::dim(&format!("took {}", ui::format_elapsed(result.elapsed_ms)));
        }
    }

    fn on_run_complete(&mut self, report: &FleetReport) {
        ui::header("Summary");
        ui::kv("Total devices", &report.total().to_string());
        ui::kv("Successful", &report.succeeded().to_string().green().to_string());
        ui::kv("Failed", &report.failed().to_string().red().to_string());
        ui::kv("Success rate", &format!("{:.1}%", report.success_rate()));
        if report.dry_run {
            ui::kv("Would change", &format!("{} item(s)", report.items_changed()));
        } else {
            ui::kv("Changed", &format!("{} item(s)", report.items_changed()));
        }
        ui::kv("Elapsed", &ui::format_elapsed(report.elapsed_ms));

        let failed = report.failed_devices();
        if !failed.is_empty() {
            ui::kv("Failed devices", &failed.join(", "));
        }
        if !report.unknown.is_empty() {
            ui::warn(&format!(
                "Not in inventory: {}",
                report.unknown.join(", ")
            ));
        }
        if report.interrupted {
            ui::warn(&format!(
                "Interrupted; not started: {}",
                if report.skipped.is_empty() {
                    "none".to_string()
                } else {
                    report.skipped.join(", ")
                }
            ));
        }

        println!();
        if report.is_success() {
            if report.dry_run {
                ui::success("Dry run complete on all devices");
            } else {
                ui::success(&format!("{} applied on all devices", self.purpose));
            }
        } else if report.failed() > 0 {
            ui::warn("Some devices failed. Check logs for details.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{ApplyPhase, CommitRecord, ConfigDelta, DeviceError};

    fn result(outcome: Outcome) -> ProvisioningResult {
        ProvisioningResult {
            device: "pe5".into(),
            phase: ApplyPhase::Committed,
            outcome,
            fetch_warning: None,
            elapsed_ms: 12,
        }
    }

    #[test]
    fn test_describe_preview() {
        let delta = ConfigDelta::new(vec![
            ChangeOp::Set {
                path: "protocols isis overload timeout".into(),
                value: "3600".into(),
            },
            ChangeOp::Delete {
                path: "protocols isis interface eth3.0".into(),
            },
        ]);
        let line = describe(&result(Outcome::Previewed {
            delta,
            comment: String::new(),
        }));
        assert_eq!(line, "pe5: would apply 2 item(s) (1 set, 1 delete)");
    }

    #[test]
    fn test_describe_commit_with_no_effect() {
        let record = CommitRecord {
            comment: "ISIS protocol changes on pe5: 1 item(s) (0 set, 1 delete)".into(),
            timestamp: chrono::Utc::now(),
            diff: String::new(),
            items: 1,
            sets: 0,
            deletes: 1,
        };
        let line = describe(&result(Outcome::Committed {
            record,
            no_effect: true,
        }));
        assert_eq!(
            line,
            "pe5: committed 1 item(s) (0 set, 1 delete), device reported no effect"
        );
    }

    #[test]
    fn test_describe_failure() {
        let line = describe(&ProvisioningResult::failed(
            "pe5",
            DeviceError::connection("Device unreachable: connection refused"),
        ));
        assert!(line.starts_with("pe5: "));
        assert!(line.contains("connection refused"));
    }

    #[test]
    fn test_describe_assumed_empty() {
        let mut r = result(Outcome::Unchanged {
            reason: UnchangedReason::DeviceReportedNoDiff,
        });
        r.fetch_warning = Some("get-configuration timed out".into());
        assert_eq!(
            describe(&r),
            "pe5: no changes needed (current state unreadable, assumed empty)"
        );
    }
}
