//! Logging configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The pattern used when none is configured, or the configured one is
/// invalid.
pub const DEFAULT_PATTERN: &str = "%^[%Y.%m.%d %H:%M:%S.%e][%@][%-8l] %v%$";

/// Configuration of the logging backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level: `trace`, `debug`, `info`, `warning`, `error`,
    /// `critical` or `off`. `RUST_LOG` takes precedence.
    pub level: String,
    /// Line pattern, see [`Pattern`](crate::Pattern).
    pub pattern: String,
    /// Directory for log files. Each service logs to
    /// `<directory>/<service>/log.txt`. No file is written when unset.
    pub directory: Option<PathBuf>,
    /// Capacity of the async message queue. Async mode needs both this and
    /// `async_threads` to be non-zero.
    pub async_buffer: usize,
    /// Number of async writer threads.
    pub async_threads: usize,
    /// Colour console output.
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            pattern: DEFAULT_PATTERN.to_string(),
            directory: None,
            async_buffer: 0,
            async_threads: 0,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Returns `true` if lines are written by the async worker pool.
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.async_buffer > 0 && self.async_threads > 0
    }

    /// The configured level as a filter directive.
    #[must_use]
    pub fn directive(&self) -> String {
        let level = self.level.trim().to_ascii_lowercase();
        match level.as_str() {
            "warning" => "warn".to_string(),
            "critical" | "err" => "error".to_string(),
            "" => "info".to_string(),
            _ => level,
        }
    }

    /// Path of the log file for `service`, if a directory is configured.
    #[must_use]
    pub fn log_file(&self, service: &str) -> Option<PathBuf> {
        self.directory
            .as_ref()
            .map(|directory| directory.join(service).join("log.txt"))
    }

    /// Override the level.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Override the pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Write log files under `directory`.
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Write lines through a pool of `threads` workers fed by a queue of
    /// `buffer` messages.
    #[must_use]
    pub fn with_async(mut self, buffer: usize, threads: usize) -> Self {
        self.async_buffer = buffer;
        self.async_threads = threads;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.pattern, DEFAULT_PATTERN);
        assert_eq!(config.directive(), "info");
        assert!(!config.is_async());
        assert!(config.log_file("svc").is_none());
    }

    #[test]
    fn test_level_names() {
        let config = LogConfig::default();
        assert_eq!(config.clone().with_level("warning").directive(), "warn");
        assert_eq!(config.clone().with_level("Critical").directive(), "error");
        assert_eq!(config.clone().with_level("off").directive(), "off");
        assert_eq!(config.with_level("engine_kernel=trace").directive(), "engine_kernel=trace");
    }

    #[test]
    fn test_async_needs_buffer_and_threads() {
        assert!(!LogConfig::default().with_async(1024, 0).is_async());
        assert!(!LogConfig::default().with_async(0, 2).is_async());
        assert!(LogConfig::default().with_async(1024, 2).is_async());
    }

    #[test]
    fn test_log_file_per_service() {
        let config = LogConfig::default().with_directory("logs");
        assert_eq!(
            config.log_file("gateway"),
            Some(PathBuf::from("logs").join("gateway").join("log.txt"))
        );
    }

    #[test]
    fn test_partial_json() {
        let config: LogConfig = serde_json::from_str(r#"{ "level": "debug" }"#).unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.pattern, DEFAULT_PATTERN);
        assert!(config.ansi);
    }
}
