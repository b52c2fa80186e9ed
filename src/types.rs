//! Public and internal types for the shardpipe API and pipeline.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::tools::{normalize_extension, split_file_path};
use crate::utils::config::{ExecutorDefaults, ShardDefaults};

/// One candidate unit of work: a file found by enumeration.
///
/// `base_name` is the file name minus directory and last extension (`site12.csv` → `site12`).
/// `extension` has no leading dot and is `None` when the file has none.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub path: PathBuf,
    pub base_name: String,
    pub extension: Option<String>,
}

impl WorkItem {
    /// Build an item from a file path. Returns `None` for paths without a file name (e.g. `/`, `..`).
    pub fn from_path(path: &Path) -> Option<Self> {
        let (_, base_name, extension) = split_file_path(path)?;
        Some(Self {
            path: path.to_path_buf(),
            base_name,
            extension,
        })
    }

    /// True if this item's extension equals `ext` (leading dot optional).
    pub fn has_extension(&self, ext: &str) -> bool {
        self.extension.as_deref() == Some(normalize_extension(ext))
    }
}

/// Walk options for enumeration (input roots and shard trees).
#[derive(Clone, Debug, Default)]
pub struct WalkOpts {
    /// Follow symbolic links.
    pub follow_links: bool,
    /// Exclude patterns (glob syntax, matched against file name and full path).
    pub exclude: Vec<String>,
    /// Strict mode: fail on first walk error instead of skipping.
    pub strict: bool,
}

/// Full runtime options (CLI, config file, env). Library users can build this directly.
#[derive(Clone, Debug)]
pub struct Opts {
    /// Root walked by stages whose input is the raw enumeration.
    pub input_root: PathBuf,
    /// Root under which every stage's shard tree lives.
    pub output_root: PathBuf,
    /// Extension required of raw inputs (e.g. `csv`). `None` takes every file.
    pub input_extension: Option<String>,
    /// Hard cap on concurrently running tasks.
    pub max_tasks: usize,
    /// Default shard capacity in bytes.
    pub shard_capacity: u64,
    /// Longest single wait for a free slot before admission is re-checked.
    pub admission_backoff: Duration,
    /// Give up on admission after this long. `None` retries forever.
    pub admission_timeout: Option<Duration>,
    /// Cap on one wait of the inter-stage barrier.
    pub stage_poll: Duration,
    pub walk: WalkOpts,
    /// Debug logging.
    pub verbose: bool,
    /// List pending work per stage without running the engine.
    pub dry_run: bool,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("."),
            output_root: PathBuf::from("."),
            input_extension: None,
            max_tasks: ExecutorDefaults::MAX_TASKS,
            shard_capacity: ShardDefaults::CAPACITY,
            admission_backoff: ExecutorDefaults::ADMISSION_BACKOFF,
            admission_timeout: Some(ExecutorDefaults::ADMISSION_TIMEOUT),
            stage_poll: ExecutorDefaults::STAGE_POLL,
            walk: WalkOpts::default(),
            verbose: false,
            dry_run: false,
        }
    }
}

/// Why a single item failed. Recorded in [`StageReport::failed`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The engine reported an error carrying a code.
    Engine { code: String },
    /// Anything else: spawn failure, I/O, unclassified runtime errors.
    Runtime { message: String },
}

/// One failed item.
#[derive(Clone, Debug, Serialize)]
pub struct ItemFailure {
    pub path: PathBuf,
    #[serde(flatten)]
    pub kind: FailureKind,
}

/// Outcome of one stage, available once the stage has drained.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StageReport {
    pub stage: String,
    /// Candidates found before filtering.
    pub candidates: usize,
    /// Candidates dropped because their output already exists.
    pub already_done: usize,
    /// Candidates skipped for not matching the stage's required extension.
    pub wrong_format: usize,
    /// Items handed to the executor (or listed, on dry run).
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: Vec<ItemFailure>,
    pub dry_run: bool,
}

impl StageReport {
    /// Number of engine calls this stage made.
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed.len()
    }
}
