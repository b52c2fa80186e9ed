use clap::Parser;
use std::path::PathBuf;

/// Idempotent multi-stage batch file pipeline.
#[derive(Clone, Parser)]
#[command(name = "shardpipe")]
#[command(about = "Run the stages in shardpipe.toml; already-processed files are skipped.")]
pub struct Cli {
    /// Pipeline config. Default: `shardpipe.toml` in the working directory.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// List pending work per stage; do not run the engine.
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,

    /// Max concurrently running engine calls.
    #[arg(long, short = 'j')]
    pub max_tasks: Option<usize>,

    /// Shard capacity in bytes (stages without their own capacity).
    #[arg(long)]
    pub shard_capacity: Option<u64>,

    /// Override the input root from the config.
    #[arg(long, short = 'i')]
    pub input_root: Option<PathBuf>,

    /// Override the output root from the config.
    #[arg(long, short = 'o')]
    pub output_root: Option<PathBuf>,

    /// Strict mode: fail on first walk error instead of skipping.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub strict: Option<bool>,

    /// Write a JSON summary of every stage to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,
}
