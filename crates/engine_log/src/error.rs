//! Logging error types.

use std::path::PathBuf;

/// An invalid log pattern.
///
/// Never fatal: [`init`](crate::init) reports it and falls back to
/// [`DEFAULT_PATTERN`](crate::DEFAULT_PATTERN).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// `%` followed by a character that names no field.
    #[error("unknown specifier `%{specifier}` at byte {position}")]
    UnknownSpecifier { specifier: char, position: usize },

    /// The pattern ends in the middle of a specifier.
    #[error("pattern ends inside a specifier starting at byte {position}")]
    Dangling { position: usize },

    /// An alignment flag without a width, e.g. `%-l`.
    #[error("alignment without width at byte {position}")]
    MissingWidth { position: usize },
}

/// Errors raised while installing the logging backend.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The level is not a valid filter directive.
    #[error("invalid log level `{level}`: {source}")]
    Level {
        level: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    /// The log file or its directory could not be created.
    #[error("failed to open log file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An async writer thread could not be spawned.
    #[error("failed to spawn log writer thread: {0}")]
    Worker(#[source] std::io::Error),

    /// A global subscriber is already installed.
    #[error("failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}
