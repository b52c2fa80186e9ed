//! CLI command handler: build the pipeline from config and run every stage.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::atomic::Ordering;

use crate::Opts;
use crate::engine::arg_parser::Cli;
use crate::pipeline::Pipeline;
use crate::types::StageReport;
use crate::utils::pipeline_toml::{
    PipelineToml, apply_env_to_opts, apply_file_to_opts, build_stages, default_config_path,
    load_pipeline_toml, validate_opts,
};
use crate::utils::setup_logging;

/// Layer defaults < config file < environment < CLI flags.
fn setup_opts(cli: &Cli, file: &PipelineToml) -> Result<Opts> {
    let mut opts = Opts::default();
    apply_file_to_opts(file, &mut opts);
    apply_env_to_opts(&mut opts)?;
    if let Some(v) = cli.verbose {
        opts.verbose = v;
    }
    if let Some(n) = cli.max_tasks {
        opts.max_tasks = n;
    }
    if let Some(c) = cli.shard_capacity {
        opts.shard_capacity = c;
    }
    if let Some(ref p) = cli.input_root {
        opts.input_root = p.clone();
    }
    if let Some(ref p) = cli.output_root {
        opts.output_root = p.clone();
    }
    if let Some(s) = cli.strict {
        opts.walk.strict = s;
    }
    opts.dry_run = cli.dry_run;
    validate_opts(&opts)?;
    Ok(opts)
}

/// Run every configured stage. Ctrl+C stops dispatch; admitted tasks finish first.
pub fn handle_run(cli: &Cli) -> Result<Vec<StageReport>> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let file = load_pipeline_toml(&config_path)?;
    let opts = setup_opts(cli, &file)?;
    setup_logging(opts.verbose);
    debug!("{} CONFIG:{:#?}", env!("CARGO_PKG_NAME").to_uppercase(), opts);

    if opts.dry_run {
        warn!("RUNNING IN DRY-RUN MODE. THE ENGINE WILL NOT BE CALLED.");
    }

    let stages = build_stages(&file.stages, &opts)?;
    let pipeline = Pipeline::from_opts(&opts, stages);

    let cancel = pipeline.cancel_flag();
    ctrlc::set_handler(move || {
        cancel.store(true, Ordering::Relaxed);
    })
    .context("set Ctrl+C handler")?;

    let reports = pipeline.run_all()?;

    if let Some(ref path) = cli.report {
        let json = serde_json::to_string_pretty(&reports).context("serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("write run report {}", path.display()))?;
        info!("Wrote run report to {}", path.display());
    }
    if pipeline.cancel_flag().load(Ordering::Relaxed) {
        anyhow::bail!("Run cancelled by user; completed outputs are kept and skipped next run");
    }
    Ok(reports)
}
