//! Kernel configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`Kernel`](crate::Kernel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Target Update frequency in Hz (0 = every beat, no pacing).
    pub tick_rate: f64,
    /// Maximum number of beats to run (0 = unlimited).
    pub max_beats: u64,
    /// Directory module names are resolved against.
    pub module_dir: PathBuf,
    /// Modules to load, in load order.
    pub modules: Vec<String>,
    /// Install interrupt/termination handlers on start.
    pub handle_signals: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_beats: 0,
            module_dir: PathBuf::from("."),
            modules: Vec::new(),
            handle_signals: true,
        }
    }
}

impl KernelConfig {
    /// Override the tick rate.
    #[must_use]
    pub fn with_tick_rate(mut self, tick_rate: f64) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    /// Stop after `max_beats` beats.
    #[must_use]
    pub fn with_max_beats(mut self, max_beats: u64) -> Self {
        self.max_beats = max_beats;
        self
    }

    /// Resolve modules against `dir`.
    #[must_use]
    pub fn with_module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.module_dir = dir.into();
        self
    }

    /// Replace the module list.
    #[must_use]
    pub fn with_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules = modules.into_iter().map(Into::into).collect();
        self
    }

    /// Append a module to the load order.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.modules.push(module.into());
        self
    }

    /// Do not install OS signal handlers.
    #[must_use]
    pub fn without_signals(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Length of one Update step, or `None` if the tick rate is `0` or its
    /// step does not fit in a [`Duration`].
    #[must_use]
    pub fn fixed_step(&self) -> Option<Duration> {
        crate::context::fixed_step(self.tick_rate)
    }
}
