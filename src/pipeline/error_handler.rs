use log::{error, info, warn};

use crate::engine::ProcessError;
use crate::types::{StageReport, WorkItem};
use crate::utils::Colors;

/// Log one item failure with the item's identity. The stage carries on.
pub fn handle_item_failure(stage: &str, item: &WorkItem, err: &ProcessError) {
    match err {
        ProcessError::Engine { code, message } => {
            warn!(
                "[{}] engine error {} while processing {}: {}",
                stage,
                code,
                item.path.display(),
                message
            );
        }
        ProcessError::Other(e) => {
            error!(
                "[{}] runtime error while processing {}: {:#}",
                stage,
                item.path.display(),
                e
            );
        }
    }
}

/// Summarize a drained stage; lists failed paths when `verbose`.
pub fn log_stage_summary(report: &StageReport, verbose: bool) {
    if report.dry_run {
        info!(
            "[{}] dry run: {} pending, {} already done, {} wrong format",
            report.stage, report.submitted, report.already_done, report.wrong_format
        );
        return;
    }
    info!(
        "[{}] {} | {} | {}",
        report.stage,
        Colors::colorize(Colors::SUCCEEDED, &format!("Succeeded: {}", report.succeeded)),
        Colors::colorize(Colors::FAILED, &format!("Failed: {}", report.failed.len())),
        Colors::colorize(
            Colors::SKIPPED,
            &format!(
                "Skipped: {} done, {} wrong format",
                report.already_done, report.wrong_format
            )
        )
    );
    if !report.failed.is_empty() {
        warn!(
            "[{}] {} items failed; re-run the pipeline to retry them",
            report.stage,
            report.failed.len()
        );
        if verbose {
            for f in &report.failed {
                eprintln!("  failed: {} ({:?})", f.path.display(), f.kind);
            }
        }
    }
}
