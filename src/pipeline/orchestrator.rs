use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::Opts;
use crate::executor::{BoundedExecutor, ExecutorConfig, ExecutorError};
use crate::pipeline::error_handler::log_stage_summary;
use crate::pipeline::runner::{RunContext, run_stage};
use crate::pipeline::stage::Stage;
use crate::types::StageReport;

/// Ordered stages sharing one executor. Built once per run.
pub struct Pipeline {
    executor: BoundedExecutor,
    stages: Vec<Stage>,
    stage_poll: Duration,
    ctx: RunContext,
    verbose: bool,
}

impl Pipeline {
    pub fn new(executor: BoundedExecutor, stage_poll: Duration) -> Self {
        Self {
            executor,
            stages: Vec::new(),
            stage_poll,
            ctx: RunContext::default(),
            verbose: false,
        }
    }

    /// Executor sized from `opts`, run context (walk options, dry run) from `opts`, and `stages`
    /// in order.
    pub fn from_opts(opts: &Opts, stages: Vec<Stage>) -> Self {
        let executor = BoundedExecutor::new(ExecutorConfig::from(opts));
        let ctx = RunContext {
            walk: opts.walk.clone(),
            dry_run: opts.dry_run,
            ..RunContext::default()
        };
        let mut pipeline = Self::new(executor, opts.stage_poll)
            .with_run_context(ctx)
            .with_verbose(opts.verbose);
        pipeline.stages = stages;
        pipeline
    }

    pub fn with_run_context(mut self, ctx: RunContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn add_stage(&mut self, stage: Stage) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn executor(&self) -> &BoundedExecutor {
        &self.executor
    }

    /// Flag that stops further dispatch when set (e.g. from a Ctrl+C handler).
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ctx.cancel)
    }

    /// Run every stage in order. See [`run_all`].
    pub fn run_all(&self) -> Result<Vec<StageReport>> {
        run_all(
            &self.stages,
            &self.executor,
            &self.ctx,
            self.stage_poll,
            self.verbose,
        )
    }
}

/// Run `stages` in order with a full barrier between them: after a stage is dispatched, wait
/// until the executor is idle before the next stage lists its input. The barrier also holds
/// when dispatch failed, so no task outlives its stage's error, except when admission timed
/// out: the tasks holding the slots are stuck, so the error is returned without draining.
/// The barrier itself gives up after the executor's admission timeout.
pub fn run_all(
    stages: &[Stage],
    executor: &BoundedExecutor,
    ctx: &RunContext,
    stage_poll: Duration,
    verbose: bool,
) -> Result<Vec<StageReport>> {
    let mut reports = Vec::with_capacity(stages.len());
    for (i, stage) in stages.iter().enumerate() {
        if ctx.is_cancelled() {
            warn!("Run cancelled before stage `{}`", stage.name);
            break;
        }
        info!("Stage {}/{}: {}", i + 1, stages.len(), stage.name);
        let dispatched = match run_stage(stage, executor, ctx) {
            Err(e) if is_admission_timeout(&e) => {
                error!(
                    "[{}] no executor slot freed up; abandoning {} running tasks",
                    stage.name,
                    executor.in_flight()
                );
                return Err(e);
            }
            other => other,
        };
        debug!("[{}] waiting for {} in-flight tasks", stage.name, executor.in_flight());
        executor
            .wait_idle(stage_poll)
            .with_context(|| format!("stage `{}` did not drain", stage.name))?;
        let report = dispatched?.finish()?;
        log_stage_summary(&report, verbose);
        reports.push(report);
    }
    Ok(reports)
}

fn is_admission_timeout(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ExecutorError>(),
        Some(ExecutorError::AdmissionTimedOut(_))
    )
}
