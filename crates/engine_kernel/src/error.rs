//! Kernel error types.

use std::path::PathBuf;

/// Errors raised while registering a system.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// The system type already has a live instance in this context.
    #[error("system `{0}` is already registered")]
    AlreadyRegistered(&'static str),

    /// The previous instance of this system type has not been destroyed yet.
    #[error("system `{0}` is pending destruction")]
    PendingDestroy(&'static str),

    /// The system's constructor failed; nothing was registered.
    #[error("failed to construct system `{system}`: {source}")]
    Construction {
        system: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Errors raised while looking up or removing a system.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// No live instance of the system type exists.
    #[error("system `{0}` is not registered")]
    NotFound(&'static str),

    /// The stored value does not have the requested type. Happens only when
    /// two distinct types share a type name, e.g. two versions of one crate.
    #[error("system `{0}` is stored under a different type with the same name")]
    TypeMismatch(&'static str),
}

/// Errors raised while loading dynamic modules.
#[derive(Debug, thiserror::Error)]
pub enum ModuleLoadError {
    /// The shared library could not be opened.
    #[error("failed to open module `{name}` at {}: {source}", path.display())]
    Open {
        name: String,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// A required entry symbol is not exported by the library.
    #[error("module `{name}` does not export `{symbol}`: {source}")]
    MissingSymbol {
        name: String,
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    /// The module was built with a different kernel or compiler version.
    #[error("module `{name}` was built as `{found}`, expected `{expected}`")]
    VersionMismatch {
        name: String,
        expected: String,
        found: String,
    },

    /// The module list names the same module twice.
    #[error("module `{0}` is listed more than once")]
    Duplicate(String),
}

/// Errors that abort kernel startup.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// A module failed to load.
    #[error(transparent)]
    Module(#[from] ModuleLoadError),

    /// OS signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signal(#[from] std::io::Error),
}
