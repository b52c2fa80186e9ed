//! shardpipe: idempotent multi-stage batch file pipeline
//!
//! Each stage lists its candidate files, drops those whose output already exists in the
//! stage's shard tree, and hands the rest to a [`BoundedExecutor`] that calls the external
//! [`Processor`] once per file. Outputs land in capacity-bounded shard directories managed by a
//! [`ShardManager`]. Stages run in order with a full barrier between them, so re-running a
//! partially completed batch only processes what is missing.

pub mod engine;
pub mod executor;
pub mod pipeline;
pub mod shard;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use engine::{CommandEngine, EngineCode, ProcessError, Processor};
pub use executor::{BoundedExecutor, ExecutorConfig, ExecutorError};
pub use pipeline::{Pipeline, RunContext, Stage, StageInput};
pub use shard::ShardManager;

use std::path::Path;

/// Result alias used by public shardpipe API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Single entry point for library use: run `stages` in order on a fresh executor sized from
/// `opts`, and return one report per stage.
///
/// ```ignore
/// let opts = shardpipe::Opts { max_tasks: 4, ..Default::default() };
/// let out = Arc::new(ShardManager::new(out_root, "class", opts.shard_capacity)?);
/// let stage = Stage::new("convert", StageInput::Enumerate { root, extension: Some("csv".into()) }, out, engine);
/// let reports = shardpipe::run_stages(vec![stage], &opts)?;
/// ```
pub fn run_stages(stages: Vec<Stage>, opts: &Opts) -> Result<Vec<StageReport>> {
    utils::pipeline_toml::validate_opts(opts)?;
    Pipeline::from_opts(opts, stages).run_all()
}

/// Convenience for a one-stage run over raw files: process every `extension` file under
/// `input_root` into shards `<class_name><n>` under `output_root`.
pub fn process_dir(
    input_root: &Path,
    extension: Option<&str>,
    output_root: &Path,
    class_name: &str,
    processor: std::sync::Arc<dyn Processor>,
    opts: &Opts,
) -> Result<StageReport> {
    let output = ShardManager::new(output_root, class_name, opts.shard_capacity)?;
    let stage = Stage::new(
        class_name,
        StageInput::Enumerate {
            root: input_root.to_path_buf(),
            extension: extension.map(str::to_string),
        },
        std::sync::Arc::new(output),
        processor,
    );
    let mut reports = run_stages(vec![stage], opts)?;
    reports
        .pop()
        .ok_or_else(|| anyhow::anyhow!("run produced no report"))
}
