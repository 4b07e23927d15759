//! Ctrl-C handling for fleet runs
//!
//! The first interrupt stops new devices from being started; devices already
//! in flight finish and release their sessions. A second interrupt exits.

use anyhow::{Context, Result};
use reconcile::CancelFlag;

/// Exit status after an interrupt (128 + SIGINT)
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Raise `cancel` on Ctrl-C
pub fn set_up_process_interrupt_handler(cancel: &CancelFlag) -> Result<()> {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            eprintln!("Interrupted again, exiting");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
        eprintln!("Interrupt received; finishing devices in progress (Ctrl-C again to abort)");
        cancel.cancel();
    })
    .context("Error setting interrupt handler")
}
