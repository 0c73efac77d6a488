//! Sync runner binary.
//!
//! Loads the runner configuration, initializes tracing and feeds the exports of every
//! configured job through the incremental sync pipeline. Meant to be started by a
//! scheduler, each invocation processes the files that changed since the last one.

use anyhow::Context;
use clap::Parser;
use etl_config::load_config;
use etl_config::shared::RunnerConfig;
use etl_telemetry::tracing::init_tracing;
use tracing::{error, info};

use crate::core::{RunOptions, run_with_config};

mod core;
mod csv_reader;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Runs only the job with this name.
    #[arg(long)]
    job: Option<String>,

    /// Forgets which files were processed so the selected jobs reprocess all of them.
    #[arg(long)]
    purge: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config::<RunnerConfig>().context("loading runner configuration")?;
    config
        .validate()
        .context("validating runner configuration")?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    // We start the runtime.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config, args))?;

    Ok(())
}

async fn async_main(config: RunnerConfig, args: Args) -> anyhow::Result<()> {
    info!(jobs = config.jobs.len(), "starting sync runner");

    let options = RunOptions {
        job: args.job,
        purge: args.purge,
    };

    if let Err(err) = run_with_config(config, options).await {
        error!("{err:#}");
        return Err(err);
    }

    info!("sync runner finished");

    Ok(())
}
