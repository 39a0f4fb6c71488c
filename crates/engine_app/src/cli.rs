//! Command-line flags.

use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "engine_app", version, about = "Hosts dynamically loaded engine modules")]
pub struct Args {
    /// Configuration file (.toml or .json)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Service name, overrides `name` from the configuration
    #[arg(short, long)]
    pub app: Option<String>,

    /// Directory modules are loaded from
    #[arg(short, long)]
    pub module_dir: Option<PathBuf>,

    /// Fixed-step Update rate in Hz (0 = every beat)
    #[arg(short, long)]
    pub tick_rate: Option<f64>,

    /// Stop after this many beats (0 = run until interrupted)
    #[arg(long)]
    pub max_beats: Option<u64>,
}

impl Args {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(app) = &self.app {
            config.name.clone_from(app);
        }
        if let Some(module_dir) = &self.module_dir {
            config.kernel.module_dir.clone_from(module_dir);
        }
        if let Some(tick_rate) = self.tick_rate {
            config.kernel.tick_rate = tick_rate;
        }
        if let Some(max_beats) = self.max_beats {
            config.kernel.max_beats = max_beats;
        }
    }
}
