//! shardpipe CLI: run the configured stages; use --dry-run to list pending work only.

use anyhow::Result;
use clap::Parser;
use shardpipe::engine::arg_parser::Cli;
use shardpipe::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
