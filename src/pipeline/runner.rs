//! Stage runner: enumerate, filter out completed work, dispatch the rest to the executor.

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::{Processor, is_within};
use crate::executor::BoundedExecutor;
use crate::pipeline::completion::exclude_completed;
use crate::pipeline::error_handler::handle_item_failure;
use crate::pipeline::report::StageProgress;
use crate::pipeline::stage::{Stage, StageInput};
use crate::shard::ShardManager;
use crate::types::{FailureKind, WalkOpts, WorkItem};

/// Run-wide settings every stage sees.
#[derive(Clone, Default)]
pub struct RunContext {
    pub walk: WalkOpts,
    pub dry_run: bool,
    /// When set, no further items are dispatched. Admitted tasks still finish.
    pub cancel: Arc<AtomicBool>,
}

impl RunContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// Dispatch one stage. Returns as soon as every item is admitted; the caller waits for the
/// executor to drain and then calls [`StageProgress::finish`].
///
/// Item failures are recorded in the progress and never abort the stage. A failure to pick an
/// output directory is stage-level: it is recorded as fatal and stops further dispatch.
pub fn run_stage(
    stage: &Stage,
    executor: &BoundedExecutor,
    ctx: &RunContext,
) -> Result<Arc<StageProgress>> {
    if let StageInput::Enumerate { root, .. } = &stage.input
        && is_within(stage.output.root(), root)
    {
        bail!(
            "stage `{}`: output root {} is inside input root {}",
            stage.name,
            stage.output.root().display(),
            root.display()
        );
    }
    let progress = Arc::new(StageProgress::new(&stage.name, ctx.dry_run));

    let candidates = stage
        .input
        .collect(&ctx.walk)
        .with_context(|| format!("collect input for stage `{}`", stage.name))?;
    let done = stage
        .output
        .all_files(None, &ctx.walk)
        .with_context(|| format!("list output of stage `{}`", stage.name))?;
    let total = candidates.len();
    let pending = exclude_completed(candidates, &done);
    progress.set_filtered(total, total - pending.len());
    info!(
        "[{}] {} candidates, {} already processed, {} pending",
        stage.name,
        total,
        total - pending.len(),
        pending.len()
    );

    for item in pending {
        if ctx.is_cancelled() {
            warn!("[{}] cancelled; not dispatching remaining items", stage.name);
            break;
        }
        if progress.has_fatal() {
            break;
        }
        if let Some(ext) = &stage.required_extension
            && !item.has_extension(ext)
        {
            info!("{} is of the wrong format; skipping", item.path.display());
            progress.record_wrong_format();
            continue;
        }
        progress.record_submitted();
        if ctx.dry_run {
            info!("[{}] would process {}", stage.name, item.path.display());
            continue;
        }

        debug!("[{}] submitting {}", stage.name, item.path.display());
        let task = ItemTask {
            stage: stage.name.clone(),
            item,
            output: Arc::clone(&stage.output),
            processor: Arc::clone(&stage.processor),
            progress: Arc::clone(&progress),
        };
        executor
            .submit(move || task.run())
            .with_context(|| format!("submit work for stage `{}`", stage.name))?;
    }
    Ok(progress)
}

/// Everything one submitted task needs.
struct ItemTask {
    stage: String,
    item: WorkItem,
    output: Arc<ShardManager>,
    processor: Arc<dyn Processor>,
    progress: Arc<StageProgress>,
}

impl ItemTask {
    fn run(self) {
        let out_dir = match self.output.get_directory() {
            Ok(dir) => dir,
            Err(e) => {
                self.progress.record_fatal(format!(
                    "no output directory for {}: {:#}",
                    self.item.path.display(),
                    e
                ));
                return;
            }
        };
        debug!(
            "Now processing {} -> {}",
            self.item.path.display(),
            out_dir.display()
        );
        match self.processor.process(&self.item.path, &out_dir) {
            Ok(()) => self.progress.record_success(),
            Err(err) => {
                handle_item_failure(&self.stage, &self.item, &err);
                self.progress
                    .record_failure(self.item.path.clone(), FailureKind::from(&err));
            }
        }
    }
}
