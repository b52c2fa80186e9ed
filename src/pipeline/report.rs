//! Per-stage progress shared between the runner and its in-flight tasks.

use anyhow::{Result, anyhow};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::types::{FailureKind, ItemFailure, StageReport};

/// Filled in by the runner (dispatch counts) and by tasks (outcomes). Read once the stage has
/// drained via [`StageProgress::finish`].
#[derive(Default)]
pub struct StageProgress {
    pub stage: String,
    pub dry_run: bool,
    candidates: AtomicUsize,
    already_done: AtomicUsize,
    wrong_format: AtomicUsize,
    submitted: AtomicUsize,
    succeeded: AtomicUsize,
    failed: Mutex<Vec<ItemFailure>>,
    first_error: Mutex<Option<String>>,
}

impl StageProgress {
    pub fn new(stage: impl Into<String>, dry_run: bool) -> Self {
        Self {
            stage: stage.into(),
            dry_run,
            ..Self::default()
        }
    }

    pub fn set_filtered(&self, candidates: usize, already_done: usize) {
        self.candidates.store(candidates, Ordering::Relaxed);
        self.already_done.store(already_done, Ordering::Relaxed);
    }

    pub fn record_wrong_format(&self) {
        self.wrong_format.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, path: PathBuf, kind: FailureKind) {
        self.failed.lock().unwrap().push(ItemFailure { path, kind });
    }

    /// Record a stage-level error. Only the first one is kept.
    pub fn record_fatal(&self, msg: String) {
        let _ = self.first_error.lock().unwrap().get_or_insert(msg);
    }

    pub fn has_fatal(&self) -> bool {
        self.first_error.lock().unwrap().is_some()
    }

    /// Build the report, or return the stage-level error if one was recorded.
    /// Call after the executor is idle.
    pub fn finish(&self) -> Result<StageReport> {
        if let Some(msg) = self.first_error.lock().unwrap().take() {
            return Err(anyhow!("stage `{}` failed: {}", self.stage, msg));
        }
        Ok(StageReport {
            stage: self.stage.clone(),
            candidates: self.candidates.load(Ordering::Relaxed),
            already_done: self.already_done.load(Ordering::Relaxed),
            wrong_format: self.wrong_format.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: std::mem::take(&mut *self.failed.lock().unwrap()),
            dry_run: self.dry_run,
        })
    }
}
