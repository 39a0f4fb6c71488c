//! Host configuration file.
//!
//! ```toml
//! name = "gateway"
//!
//! [kernel]
//! tick_rate = 30.0
//! module_dir = "target/debug"
//! modules = ["module_greeter", "module_countdown"]
//!
//! [log]
//! level = "debug"
//! directory = "logs"
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use engine_kernel::KernelConfig;
use engine_log::LogConfig;
use serde::{Deserialize, Serialize};

/// Errors raised while loading or validating the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported config format {}, expected .toml or .json", path.display())]
    Format { path: PathBuf },

    #[error("service name is empty")]
    EmptyName,

    #[error("tick rate must be 0 or a positive rate with a representable step, got {0}")]
    TickRate(f64),

    #[error("module #{0} has an empty name")]
    EmptyModule(usize),

    #[error("module `{0}` is listed more than once")]
    DuplicateModule(String),
}

/// Everything the host needs to boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Service name, used for the log file and the `%n` log field.
    pub name: String,
    pub kernel: KernelConfig,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "engine".to_string(),
            kernel: KernelConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load a `.toml` or `.json` file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, has another extension, or does not
    /// parse.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("toml") => toml::from_str(&text).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            }),
            Some("json") => serde_json::from_str(&text).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            }),
            _ => Err(ConfigError::Format {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Normalise and check the configuration. Module names are trimmed.
    ///
    /// # Errors
    ///
    /// Fails on an empty service name, an invalid tick rate, or an empty or
    /// duplicate module name.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }

        let tick_rate = self.kernel.tick_rate;
        let representable = tick_rate == 0.0 || self.kernel.fixed_step().is_some();
        if !tick_rate.is_finite() || tick_rate < 0.0 || !representable {
            return Err(ConfigError::TickRate(tick_rate));
        }

        let mut seen = HashSet::new();
        for (position, module) in self.kernel.modules.iter_mut().enumerate() {
            *module = module.trim().to_string();
            if module.is_empty() {
                return Err(ConfigError::EmptyModule(position));
            }
            if !seen.insert(module.clone()) {
                return Err(ConfigError::DuplicateModule(module.clone()));
            }
        }
        Ok(())
    }
}
