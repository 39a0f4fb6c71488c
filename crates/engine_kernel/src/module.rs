//! Dynamic module loading.
//!
//! A module is a `cdylib` that exports three symbols, generated by
//! [`declare_module!`](crate::declare_module):
//!
//! - `engine_module_tag()` is a C-ABI function returning the module's
//!   [`BUILD_TAG`] as a NUL-terminated string.
//! - `engine_module_init(Context, &Dispatch)` binds the module to the host's
//!   context and logging dispatcher and runs the module's registrations.
//! - `engine_module_fini()` runs the module's teardown.
//!
//! Modules are loaded in configuration order and unloaded in reverse. The
//! tag is read before anything else runs: a module whose tag differs from
//! the host's was built against another kernel or compiler and is rejected
//! without calling its initializer.
//!
//! ```rust,ignore
//! use engine_kernel::{Context, declare_module};
//!
//! fn init(ctx: Context) {
//!     ctx.register_system(Greeter::default()).ok();
//! }
//!
//! fn fini() {}
//!
//! declare_module!(init = init, fini = fini);
//! ```

use std::collections::HashMap;
use std::ffi::{CStr, OsStr, c_char};
use std::fmt;
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{Dispatch, debug, error, info};

use crate::context::Context;
use crate::error::ModuleLoadError;

/// Kernel version plus the compiler that built it.
///
/// Compiled into the host and into every module; all of them must agree.
pub const BUILD_TAG: &str = env!("ENGINE_BUILD_TAG");

/// Name of the exported build tag accessor.
pub const TAG_SYMBOL: &str = "engine_module_tag";

/// Name of the exported initializer.
pub const INIT_SYMBOL: &str = "engine_module_init";

/// Name of the exported finalizer.
pub const FINI_SYMBOL: &str = "engine_module_fini";

/// Signature of the build tag accessor. The returned string is static and
/// NUL-terminated.
pub type ModuleTag = unsafe extern "C" fn() -> *const c_char;

/// Signature of a module initializer.
pub type ModuleInit = fn(Context, &Dispatch);

/// Signature of a module finalizer.
pub type ModuleFini = fn();

/// A module's entry points, plus the library that holds their code.
pub struct DynLib {
    name: String,
    path: PathBuf,
    tag: String,
    init: ModuleInit,
    fini: ModuleFini,
    /// `None` for modules linked into the host.
    library: Option<Library>,
}

impl DynLib {
    /// Wrap entry points that live in the host binary. They carry the
    /// host's [`BUILD_TAG`].
    #[must_use]
    pub fn from_entry_points(name: impl Into<String>, init: ModuleInit, fini: ModuleFini) -> Self {
        Self {
            name: name.into(),
            path: PathBuf::new(),
            tag: BUILD_TAG.to_owned(),
            init,
            fini,
            library: None,
        }
    }

    /// Replace the build tag the module reports.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Open the shared library at `path`, read its build tag and resolve both
    /// entry points. Neither entry point is called.
    ///
    /// # Errors
    ///
    /// Fails if the library cannot be opened or a symbol is missing.
    pub fn open(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, ModuleLoadError> {
        let name = name.into();
        let path = path.into();

        // SAFETY: modules are trusted, same-process code; library
        // constructors run here.
        let library = unsafe { Library::new(&path) }.map_err(|source| ModuleLoadError::Open {
            name: name.clone(),
            path: path.clone(),
            source,
        })?;

        // SAFETY: `engine_module_tag` is a C-ABI function without arguments
        // returning a static NUL-terminated string, whichever compiler built
        // the module.
        let tag = unsafe {
            let symbol = library
                .get::<ModuleTag>(TAG_SYMBOL.as_bytes())
                .map_err(|source| ModuleLoadError::MissingSymbol {
                    name: name.clone(),
                    symbol: TAG_SYMBOL,
                    source,
                })?;
            let tag = symbol();
            if tag.is_null() {
                String::new()
            } else {
                CStr::from_ptr(tag).to_string_lossy().into_owned()
            }
        };

        // SAFETY: the symbol types match what `declare_module!` exports. They
        // are only called once the build tag matches the host's.
        let init = unsafe { library.get::<ModuleInit>(INIT_SYMBOL.as_bytes()) }
            .map(|symbol| *symbol)
            .map_err(|source| ModuleLoadError::MissingSymbol {
                name: name.clone(),
                symbol: INIT_SYMBOL,
                source,
            })?;
        let fini = unsafe { library.get::<ModuleFini>(FINI_SYMBOL.as_bytes()) }
            .map(|symbol| *symbol)
            .map_err(|source| ModuleLoadError::MissingSymbol {
                name: name.clone(),
                symbol: FINI_SYMBOL,
                source,
            })?;

        Ok(Self {
            name,
            path,
            tag,
            init,
            fini,
            library: Some(library),
        })
    }

    /// Module name, as configured.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved library path. Empty for modules linked into the host.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build tag the module was compiled with.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn initialize(&self, ctx: &Context, dispatch: &Dispatch) {
        (self.init)(ctx.clone(), dispatch);
    }

    fn finalize(&self) {
        (self.fini)();
    }
}

impl fmt::Debug for DynLib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynLib")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("tag", &self.tag)
            .field("native", &self.library.is_some())
            .finish()
    }
}

/// Turns a configured module name into loadable entry points.
pub trait ModuleOpener {
    /// Open the module called `name`, looking in `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the module cannot be opened or does not export both entry
    /// points.
    fn open(&mut self, name: &str, dir: &Path) -> Result<DynLib, ModuleLoadError>;
}

/// Opens modules as shared libraries from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeOpener;

impl NativeOpener {
    /// Path of the library for `name` inside `dir`.
    ///
    /// Names without an extension get the platform's library naming
    /// (`libname.so`, `libname.dylib`, `name.dll`).
    #[must_use]
    pub fn resolve(name: &str, dir: &Path) -> PathBuf {
        if Path::new(name).extension().is_some() {
            dir.join(name)
        } else {
            dir.join(libloading::library_filename(OsStr::new(name)))
        }
    }
}

impl ModuleOpener for NativeOpener {
    fn open(&mut self, name: &str, dir: &Path) -> Result<DynLib, ModuleLoadError> {
        DynLib::open(name, Self::resolve(name, dir))
    }
}

struct StaticModule {
    tag: String,
    init: ModuleInit,
    fini: ModuleFini,
}

/// Serves modules linked into the host by name, and opens every other name
/// as a shared library.
#[derive(Default)]
pub struct StaticOpener {
    modules: HashMap<String, StaticModule>,
}

impl StaticOpener {
    /// Serve `name` from the given entry points, tagged with the host's
    /// [`BUILD_TAG`].
    #[must_use]
    pub fn with(self, name: impl Into<String>, init: ModuleInit, fini: ModuleFini) -> Self {
        self.with_tag(name, BUILD_TAG, init, fini)
    }

    /// Serve `name` from the given entry points, reporting `tag`.
    #[must_use]
    pub fn with_tag(
        mut self,
        name: impl Into<String>,
        tag: impl Into<String>,
        init: ModuleInit,
        fini: ModuleFini,
    ) -> Self {
        let module = StaticModule {
            tag: tag.into(),
            init,
            fini,
        };
        self.modules.insert(name.into(), module);
        self
    }
}

impl ModuleOpener for StaticOpener {
    fn open(&mut self, name: &str, dir: &Path) -> Result<DynLib, ModuleLoadError> {
        match self.modules.get(name) {
            Some(module) => Ok(DynLib::from_entry_points(name, module.init, module.fini)
                .with_tag(module.tag.clone())),
            None => NativeOpener.open(name, dir),
        }
    }
}

impl fmt::Debug for StaticOpener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.modules.keys()).finish()
    }
}

/// Loads modules in order and unloads them in reverse.
pub struct ModuleLoader {
    dir: PathBuf,
    opener: Box<dyn ModuleOpener>,
    loaded: Vec<DynLib>,
}

impl ModuleLoader {
    /// A loader opening shared libraries from `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_opener(dir, NativeOpener)
    }

    /// A loader using a custom opener.
    #[must_use]
    pub fn with_opener(dir: impl Into<PathBuf>, opener: impl ModuleOpener + 'static) -> Self {
        Self {
            dir: dir.into(),
            opener: Box::new(opener),
            loaded: Vec::new(),
        }
    }

    /// Directory modules are resolved against.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of the loaded modules, in load order.
    pub fn loaded(&self) -> impl Iterator<Item = &str> {
        self.loaded.iter().map(DynLib::name)
    }

    /// Number of loaded modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    /// Returns `true` if no module is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Open `names` in order and run each initializer against `ctx`.
    ///
    /// Each module's build tag is checked before its initializer runs. On
    /// failure, everything the loaded modules registered into `ctx` is
    /// purged and the loaded modules are unloaded in reverse order. The
    /// module that failed is released without running either entry point.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate name, an unopenable library, a missing entry
    /// point or a build tag mismatch.
    pub fn load<I, S>(&mut self, ctx: &Context, names: I) -> Result<(), ModuleLoadError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
        for name in names {
            if let Err(err) = self.load_one(ctx, name.as_ref(), &dispatch) {
                error!(error = %err, "module loading failed");
                ctx.purge();
                self.unload();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Run every finalizer and release every library, in reverse load order.
    pub fn unload(&mut self) {
        while let Some(module) = self.loaded.pop() {
            debug!(module = module.name(), "finalizing module");
            module.finalize();
            info!(module = module.name(), "module unloaded");
            drop(module);
        }
    }

    fn load_one(
        &mut self,
        ctx: &Context,
        name: &str,
        dispatch: &Dispatch,
    ) -> Result<(), ModuleLoadError> {
        if self.loaded.iter().any(|module| module.name() == name) {
            return Err(ModuleLoadError::Duplicate(name.to_owned()));
        }

        let module = self.opener.open(name, &self.dir)?;
        if module.tag() != BUILD_TAG {
            return Err(ModuleLoadError::VersionMismatch {
                name: name.to_owned(),
                expected: BUILD_TAG.to_owned(),
                found: module.tag().to_owned(),
            });
        }

        debug!(module = name, path = %module.path().display(), "initializing module");
        module.initialize(ctx, dispatch);
        info!(module = name, tag = module.tag(), "module loaded");
        self.loaded.push(module);
        Ok(())
    }
}

impl Drop for ModuleLoader {
    fn drop(&mut self) {
        self.unload();
    }
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("dir", &self.dir)
            .field("loaded", &self.loaded)
            .finish_non_exhaustive()
    }
}

#[doc(hidden)]
pub mod __private {
    use std::ffi::CStr;

    pub use tracing::Dispatch;

    /// [`BUILD_TAG`](super::BUILD_TAG) with a trailing NUL.
    pub const BUILD_TAG_NUL: &CStr =
        match CStr::from_bytes_with_nul(concat!(env!("ENGINE_BUILD_TAG"), "\0").as_bytes()) {
            Ok(tag) => tag,
            Err(_) => panic!("build tag contains a NUL byte"),
        };

    /// Route the module's `tracing` events to the host's subscriber.
    pub fn attach_dispatch(dispatch: &Dispatch) {
        // Fails when the module is linked into the host, which already
        // shares the host's dispatcher.
        let _ = tracing::dispatcher::set_global_default(dispatch.clone());
        // Callsites in this copy of `tracing` cached their interest before a
        // subscriber existed.
        tracing::callsite::rebuild_interest_cache();
    }
}

/// Export the entry points of a module.
///
/// `init` is called with the host's [`Context`](crate::Context); `fini` takes
/// no arguments. The build tag accessor is generated as well.
#[macro_export]
macro_rules! declare_module {
    (init = $init:path, fini = $fini:path $(,)?) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn engine_module_tag() -> *const ::std::ffi::c_char {
            $crate::module::__private::BUILD_TAG_NUL.as_ptr()
        }

        #[unsafe(no_mangle)]
        pub fn engine_module_init(
            ctx: $crate::Context,
            dispatch: &$crate::module::__private::Dispatch,
        ) {
            $crate::module::__private::attach_dispatch(dispatch);
            $init(ctx);
        }

        #[unsafe(no_mangle)]
        pub fn engine_module_fini() {
            $fini();
        }
    };
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::system::System;

    thread_local! {
        static CALLS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    fn record(call: &str) {
        CALLS.with(|calls| calls.borrow_mut().push(call.to_owned()));
    }

    fn take_calls() -> Vec<String> {
        CALLS.with(|calls| std::mem::take(&mut *calls.borrow_mut()))
    }

    struct LogSystem;

    impl System for LogSystem {}

    struct NetSystem;

    impl System for NetSystem {}

    fn log_init(ctx: Context, _dispatch: &Dispatch) {
        record("log:init");
        ctx.register_system(LogSystem).unwrap();
    }

    fn log_fini() {
        record("log:fini");
    }

    fn net_init(ctx: Context, _dispatch: &Dispatch) {
        record("net:init");
        ctx.register_system(NetSystem).unwrap();
    }

    fn net_fini() {
        record("net:fini");
    }

    struct StaleSystem;

    impl System for StaleSystem {}

    fn stale_init(ctx: Context, _dispatch: &Dispatch) {
        record("stale:init");
        ctx.register_system(StaleSystem).unwrap();
    }

    fn stale_fini() {
        record("stale:fini");
    }

    fn opener() -> StaticOpener {
        StaticOpener::default()
            .with("log", log_init, log_fini)
            .with("net", net_init, net_fini)
            .with_tag("stale", "0.0.0 (rustc 1.0.0)", stale_init, stale_fini)
    }

    #[test]
    fn test_build_tag_names_version_and_compiler() {
        assert!(BUILD_TAG.starts_with(env!("CARGO_PKG_VERSION")));
        assert!(BUILD_TAG.contains("rustc"));
    }

    #[test]
    fn test_resolve_uses_platform_naming() {
        let dir = Path::new("mods");
        let path = NativeOpener::resolve("greeter", dir);
        assert_eq!(path.parent(), Some(dir));
        let file = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file.contains("greeter"));
        assert_ne!(file, "greeter");

        assert_eq!(
            NativeOpener::resolve("custom.so", dir),
            dir.join("custom.so")
        );
    }

    #[test]
    fn test_load_in_order_and_unload_in_reverse() {
        take_calls();
        let ctx = Context::new();
        let mut loader = ModuleLoader::with_opener(".", opener());
        loader.load(&ctx, ["log", "net"]).unwrap();

        assert_eq!(loader.loaded().collect::<Vec<_>>(), vec!["log", "net"]);
        assert!(ctx.has_system::<LogSystem>());
        assert!(ctx.has_system::<NetSystem>());

        ctx.purge();
        loader.unload();
        assert!(loader.is_empty());
        assert_eq!(
            take_calls(),
            vec!["log:init", "net:init", "net:fini", "log:fini"]
        );
    }

    #[test]
    fn test_version_mismatch_unwinds_loaded_modules() {
        take_calls();
        let ctx = Context::new();
        let mut loader = ModuleLoader::with_opener(".", opener());
        let err = loader.load(&ctx, ["log", "net", "stale"]).unwrap_err();

        assert!(matches!(
            err,
            ModuleLoadError::VersionMismatch { ref name, .. } if name == "stale"
        ));
        assert!(loader.is_empty());
        assert_eq!(ctx.system_count(), 0);
        assert!(!ctx.has_system::<StaleSystem>());
        // The rejected module never runs either entry point.
        assert_eq!(
            take_calls(),
            vec!["log:init", "net:init", "net:fini", "log:fini"]
        );
    }

    #[test]
    fn test_mismatched_first_module_runs_nothing() {
        take_calls();
        let ctx = Context::new();
        let mut loader = ModuleLoader::with_opener(".", opener());
        let err = loader.load(&ctx, ["stale", "log"]).unwrap_err();

        assert!(matches!(
            err,
            ModuleLoadError::VersionMismatch { ref found, .. } if found == "0.0.0 (rustc 1.0.0)"
        ));
        assert!(take_calls().is_empty());
    }

    #[test]
    fn test_missing_library_fails_startup() {
        take_calls();
        let ctx = Context::new();
        let dir = tempfile::tempdir().unwrap();
        let mut loader = ModuleLoader::with_opener(dir.path(), opener());
        let err = loader.load(&ctx, ["log", "missing"]).unwrap_err();

        assert!(matches!(err, ModuleLoadError::Open { ref name, .. } if name == "missing"));
        assert!(loader.is_empty());
        assert!(!ctx.has_system::<LogSystem>());
        assert_eq!(take_calls(), vec!["log:init", "log:fini"]);
    }

    #[test]
    fn test_duplicate_module_is_rejected() {
        take_calls();
        let ctx = Context::new();
        let mut loader = ModuleLoader::with_opener(".", opener());
        let err = loader.load(&ctx, ["log", "log"]).unwrap_err();
        assert!(matches!(err, ModuleLoadError::Duplicate(ref name) if name == "log"));
        assert_eq!(take_calls(), vec!["log:init", "log:fini"]);
    }

    #[test]
    fn test_drop_unloads() {
        take_calls();
        let ctx = Context::new();
        {
            let mut loader = ModuleLoader::with_opener(".", opener());
            loader.load(&ctx, ["net"]).unwrap();
            ctx.purge();
        }
        assert_eq!(take_calls(), vec!["net:init", "net:fini"]);
    }

    #[test]
    fn test_linked_module_carries_host_tag() {
        let module = DynLib::from_entry_points("log", log_init, log_fini);
        assert_eq!(module.tag(), BUILD_TAG);
        assert!(module.path().as_os_str().is_empty());

        let module = module.with_tag("other");
        assert_eq!(module.tag(), "other");
    }

    #[test]
    fn test_tag_with_nul_matches_build_tag() {
        assert_eq!(__private::BUILD_TAG_NUL.to_str().unwrap(), BUILD_TAG);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_library_without_entry_points_is_rejected() {
        let err = DynLib::open("libc", "libc.so.6").unwrap_err();
        assert!(matches!(
            err,
            ModuleLoadError::MissingSymbol { ref name, symbol, .. }
                if name == "libc" && symbol == TAG_SYMBOL
        ));
    }
}
