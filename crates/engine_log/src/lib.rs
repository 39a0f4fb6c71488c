//! # engine_log
//!
//! Logging backend for engine services.
//!
//! Installs a `tracing` subscriber that writes every event twice at most:
//! to stdout (optionally coloured) and to `<directory>/<service>/log.txt`.
//! Lines are laid out by an spdlog-style [`Pattern`]. In async mode lines
//! go through a bounded queue drained by a pool of writer threads.
//!
//! ```rust,no_run
//! use engine_log::LogConfig;
//!
//! let config = LogConfig::default().with_directory("logs").with_async(8192, 1);
//! let _guard = engine_log::init("gateway", &config).unwrap();
//! tracing::info!("service started");
//! ```

pub mod config;
pub mod error;
pub mod pattern;
pub mod writer;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use config::{DEFAULT_PATTERN, LogConfig};
pub use error::{FormatError, LogError};
pub use pattern::{Pattern, PatternFormatter};
pub use writer::{AsyncGuard, Target};

/// Keeps the logging backend alive. Dropping it flushes queued lines.
#[must_use = "dropping the guard stops async log writers"]
pub struct LogGuard {
    writers: Option<AsyncGuard>,
}

impl LogGuard {
    /// Lines dropped because the async queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.writers.as_ref().map_or(0, AsyncGuard::dropped)
    }
}

/// Build the subscriber for `service` and install it globally.
///
/// # Errors
///
/// Fails if the level is invalid, the log file cannot be opened, a writer
/// thread cannot be spawned or a global subscriber is already installed.
pub fn init(service: &str, config: &LogConfig) -> Result<LogGuard, LogError> {
    let (dispatch, guard) = build(service, config)?;
    dispatch.try_init()?;
    tracing::debug!(
        service,
        level = %config.directive(),
        async_mode = config.is_async(),
        "logging initialised"
    );
    Ok(guard)
}

/// Build the subscriber for `service` without installing it.
///
/// # Errors
///
/// Fails if the level is invalid, the log file cannot be opened or a writer
/// thread cannot be spawned.
pub fn build(service: &str, config: &LogConfig) -> Result<(Dispatch, LogGuard), LogError> {
    let filter = filter(config)?;
    let formatter = PatternFormatter::new(resolve_pattern(&config.pattern), service);
    let file = config
        .log_file(service)
        .map(|path| open_log_file(&path))
        .transpose()?;

    let (console, file, writers) = if config.is_async() {
        let has_file = file.is_some();
        let sinks = writer::Sinks::new(
            io::stdout(),
            file.map(|file| Box::new(file) as Box<dyn Write + Send>),
        );
        let (writer, guard) = writer::spawn(sinks, config.async_buffer, config.async_threads)?;
        let file = has_file.then(|| BoxMakeWriter::new(writer.to(Target::File)));
        (BoxMakeWriter::new(writer.to(Target::Console)), file, Some(guard))
    } else {
        let file = file.map(|file| BoxMakeWriter::new(Arc::new(file)));
        (BoxMakeWriter::new(io::stdout), file, None)
    };

    let console_layer = fmt::layer()
        .event_format(formatter.clone())
        .with_ansi(config.ansi)
        .with_writer(console);
    let file_layer = file.map(|file| {
        fmt::layer()
            .event_format(formatter)
            .with_ansi(false)
            .with_writer(file)
    });

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer);
    Ok((Dispatch::new(subscriber), LogGuard { writers }))
}

/// Parse `pattern`, falling back to [`DEFAULT_PATTERN`] with a diagnostic on
/// stderr if it is invalid.
#[must_use]
pub fn resolve_pattern(pattern: &str) -> Pattern {
    Pattern::parse(pattern).unwrap_or_else(|err| {
        eprintln!("[Error] log pattern `{pattern}`: {err}, default pattern used");
        Pattern::default()
    })
}

fn filter(config: &LogConfig) -> Result<EnvFilter, LogError> {
    EnvFilter::try_from_default_env().or_else(|_| {
        let level = config.directive();
        EnvFilter::try_new(&level).map_err(|source| LogError::Level { level, source })
    })
}

fn open_log_file(path: &Path) -> Result<File, LogError> {
    let io_error = |source| LogError::File {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_error)
}
