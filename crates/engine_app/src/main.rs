//! # engine_app: host
//!
//! Boots a kernel from a configuration file and runs it until interrupted.
//!
//! ## Startup Sequence
//!
//! 1. Parse flags and load the configuration (TOML or JSON).
//! 2. Install the logging backend for the configured service.
//! 3. Install signal handlers and load the configured modules in order.
//! 4. Run the heartbeat until shutdown is requested.
//! 5. Unload the modules in reverse order.
//!
//! Any failure before the heartbeat starts exits with a non-zero status.

mod cli;
mod config;

use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::info;

use engine_kernel::{BUILD_TAG, Kernel};

use cli::Args;
use config::AppConfig;

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = format!("{err:#}"), "engine host failed");
            eprintln!("[Error] {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => AppConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let _log = engine_log::init(&config.name, &config.log).context("failed to initialise logging")?;
    info!(service = %config.name, build = BUILD_TAG, "engine host starting");

    let mut kernel = Kernel::new(config.kernel);
    kernel
        .context()
        .set_args(std::env::args_os().map(|arg| arg.to_string_lossy().into_owned()));
    kernel.start().context("failed to start kernel")?;

    let beats = kernel.run();
    kernel.shutdown();

    info!(service = %config.name, beats, "engine host stopped");
    Ok(())
}
