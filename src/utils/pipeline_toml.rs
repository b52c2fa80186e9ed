//! Load `shardpipe.toml`: run settings plus the ordered `[[stage]]` list (CLI only).
//! Library users build [`Opts`] and [`Stage`]s directly.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::Opts;
use crate::engine::CommandEngine;
use crate::pipeline::{Stage, StageInput};
use crate::shard::ShardManager;
use crate::utils::config::PackagePaths;

/// `input` value naming the raw input root instead of a prior stage.
pub const RAW_INPUT: &str = "input";

#[derive(Debug, Default, Deserialize)]
pub struct PipelineToml {
    #[serde(default)]
    settings: SettingsSection,
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageSection>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    input_root: Option<String>,
    output_root: Option<String>,
    input_extension: Option<String>,
    max_tasks: Option<usize>,
    shard_capacity: Option<u64>,
    admission_backoff_ms: Option<u64>,
    /// 0 disables the admission timeout.
    admission_timeout_secs: Option<u64>,
    stage_poll_ms: Option<u64>,
    exclude: Option<Vec<String>>,
    follow_links: Option<bool>,
    strict: Option<bool>,
    verbose: Option<bool>,
}

/// One `[[stage]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct StageSection {
    pub name: String,
    /// Shard tree directory under `output_root`. Default: the stage name.
    pub output_dir: Option<String>,
    /// Shard directory prefix. Default: `<name>_`.
    pub class_name: Option<String>,
    /// `"input"` or the name of an earlier stage.
    #[serde(default = "default_input")]
    pub input: String,
    pub required_extension: Option<String>,
    /// Shard capacity override for this stage (bytes).
    pub capacity: Option<u64>,
    /// Engine argv; `{input}`, `{output_dir}` and `{stem}` are substituted per item.
    pub command: Vec<String>,
}

fn default_input() -> String {
    RAW_INPUT.to_string()
}

/// Load and parse the config at `path`.
pub fn load_pipeline_toml(path: &Path) -> Result<PipelineToml> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("read pipeline config {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parse pipeline config {}", path.display()))
}

/// Default config path: `shardpipe.toml` in the working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from(PackagePaths::get().config_filename())
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $opts:expr, $sec_field:ident => $($opts_field:ident).+) => {
        if let Some(v) = $sec.$sec_field.clone() {
            $opts.$($opts_field).+ = v;
        }
    };
}

/// Apply file settings to opts (only fields present in the file). Call before env and CLI.
pub fn apply_file_to_opts(file: &PipelineToml, opts: &mut Opts) {
    let s = &file.settings;
    if let Some(ref p) = s.input_root {
        opts.input_root = PathBuf::from(p);
    }
    if let Some(ref p) = s.output_root {
        opts.output_root = PathBuf::from(p);
    }
    if let Some(ref e) = s.input_extension {
        opts.input_extension = Some(e.clone());
    }
    apply_file_opt!(s, opts, max_tasks => max_tasks);
    apply_file_opt!(s, opts, shard_capacity => shard_capacity);
    if let Some(ms) = s.admission_backoff_ms {
        opts.admission_backoff = Duration::from_millis(ms);
    }
    if let Some(secs) = s.admission_timeout_secs {
        opts.admission_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if let Some(ms) = s.stage_poll_ms {
        opts.stage_poll = Duration::from_millis(ms);
    }
    apply_file_opt!(s, opts, exclude => walk.exclude);
    apply_file_opt!(s, opts, follow_links => walk.follow_links);
    apply_file_opt!(s, opts, strict => walk.strict);
    apply_file_opt!(s, opts, verbose => verbose);
}

/// Apply `SHARDPIPE_MAX_TASKS` / `SHARDPIPE_SHARD_CAPACITY` from the environment (and `.env`).
pub fn apply_env_to_opts(opts: &mut Opts) -> Result<()> {
    let _ = dotenvy::dotenv();
    let paths = PackagePaths::get();
    let key = paths.env_var("MAX_TASKS");
    if let Ok(v) = std::env::var(&key) {
        opts.max_tasks = v.trim().parse().with_context(|| format!("parse {key}={v}"))?;
    }
    let key = paths.env_var("SHARD_CAPACITY");
    if let Ok(v) = std::env::var(&key) {
        opts.shard_capacity = v.trim().parse().with_context(|| format!("parse {key}={v}"))?;
    }
    Ok(())
}

/// Reject settings the pipeline cannot run with.
pub fn validate_opts(opts: &Opts) -> Result<()> {
    if opts.max_tasks == 0 {
        bail!("max_tasks must be at least 1");
    }
    if opts.shard_capacity == 0 {
        bail!("shard_capacity must be at least 1 byte");
    }
    Ok(())
}

/// Build stages in file order. Each stage's input is the raw input root or an earlier stage's
/// shard tree; shard managers are created (and their first shard selected) here.
pub fn build_stages(sections: &[StageSection], opts: &Opts) -> Result<Vec<Stage>> {
    if sections.is_empty() {
        bail!("pipeline config defines no [[stage]] entries");
    }
    let mut stages: Vec<Stage> = Vec::with_capacity(sections.len());
    for sec in sections {
        if stages.iter().any(|s| s.name == sec.name) {
            bail!("duplicate stage name `{}`", sec.name);
        }
        let input = if sec.input == RAW_INPUT {
            StageInput::Enumerate {
                root: opts.input_root.clone(),
                extension: opts.input_extension.clone(),
            }
        } else {
            let prev = stages
                .iter()
                .find(|s| s.name == sec.input)
                .with_context(|| {
                    format!(
                        "stage `{}` reads from `{}`, which is not an earlier stage",
                        sec.name, sec.input
                    )
                })?;
            StageInput::Shards(Arc::clone(&prev.output))
        };
        let capacity = sec.capacity.unwrap_or(opts.shard_capacity);
        if capacity == 0 {
            bail!("stage `{}`: capacity must be at least 1 byte", sec.name);
        }
        let output = ShardManager::new(
            opts.output_root
                .join(sec.output_dir.as_deref().unwrap_or(&sec.name)),
            sec.class_name
                .clone()
                .unwrap_or_else(|| format!("{}_", sec.name)),
            capacity,
        )
        .with_context(|| format!("set up output for stage `{}`", sec.name))?;
        let engine = CommandEngine::from_argv(&sec.command)
            .with_context(|| format!("stage `{}`", sec.name))?;
        let mut stage = Stage::new(&sec.name, input, Arc::new(output), Arc::new(engine));
        stage.required_extension = sec.required_extension.clone();
        stages.push(stage);
    }
    Ok(stages)
}
