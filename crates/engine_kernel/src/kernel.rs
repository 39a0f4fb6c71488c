//! Kernel facade: boots, runs and tears down a context.
//!
//! The host drives a kernel through three calls:
//!
//! 1. [`Kernel::start`] installs signal handlers and loads the configured
//!    modules in order.
//! 2. [`Kernel::run`] runs the heartbeat until shutdown is requested.
//! 3. [`Kernel::shutdown`] purges the context and unloads the modules in
//!    reverse order. Dropping the kernel does the same.

use tracing::info;

use crate::config::KernelConfig;
use crate::context::Context;
use crate::error::KernelError;
use crate::heartbeat::Heartbeat;
use crate::module::ModuleLoader;
use crate::signal::{SignalBridge, install_panic_hook};

/// A context plus the modules and signal handlers bound to it.
#[derive(Debug)]
pub struct Kernel {
    config: KernelConfig,
    ctx: Context,
    loader: ModuleLoader,
    signals: Option<SignalBridge>,
}

impl Kernel {
    /// Create a kernel loading shared libraries from the configured module
    /// directory.
    #[must_use]
    pub fn new(config: KernelConfig) -> Self {
        let loader = ModuleLoader::new(&config.module_dir);
        Self::with_loader(config, loader)
    }

    /// Create a kernel with a custom module loader.
    #[must_use]
    pub fn with_loader(config: KernelConfig, loader: ModuleLoader) -> Self {
        let ctx = Context::new();
        ctx.set_tick_rate(config.tick_rate);
        Self {
            config,
            ctx,
            loader,
            signals: None,
        }
    }

    /// The kernel's context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The kernel's configuration.
    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Names of the loaded modules, in load order.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.loader.loaded()
    }

    /// Install signal handlers (if configured) and load every configured
    /// module.
    ///
    /// # Errors
    ///
    /// Fails if signal handlers cannot be installed or a module fails to
    /// load. Modules loaded before the failure are already unloaded.
    pub fn start(&mut self) -> Result<(), KernelError> {
        info!(
            context = %self.ctx.id(),
            modules = self.config.modules.len(),
            module_dir = %self.config.module_dir.display(),
            "starting kernel"
        );

        if self.config.handle_signals && self.signals.is_none() {
            self.signals = Some(SignalBridge::install(self.ctx.shutdown_handle())?);
            install_panic_hook(self.ctx.shutdown_handle());
        }

        self.loader.load(&self.ctx, &self.config.modules)?;
        info!(modules = self.loader.len(), "kernel started");
        Ok(())
    }

    /// Run the heartbeat until shutdown is requested. Returns the number of
    /// beats run.
    pub fn run(&mut self) -> u64 {
        let mut heartbeat = Heartbeat::new(self.ctx.clone()).with_max_beats(self.config.max_beats);
        heartbeat.run();
        heartbeat.beats()
    }

    /// Drop every remaining system and unload the modules in reverse order.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.loader.is_empty() && self.ctx.system_count() == 0 && self.signals.is_none() {
            return;
        }
        self.ctx.purge();
        self.loader.unload();
        self.signals = None;
        info!(context = %self.ctx.id(), "kernel shut down");
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use tracing::Dispatch;

    use super::*;
    use crate::error::ModuleLoadError;
    use crate::module::StaticOpener;
    use crate::system::{Stage, Stages, System};

    thread_local! {
        static CALLS: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
    }

    fn record(call: &'static str) {
        CALLS.with(|calls| calls.borrow_mut().push(call));
    }

    fn take_calls() -> Vec<&'static str> {
        CALLS.with(|calls| std::mem::take(&mut *calls.borrow_mut()))
    }

    /// Counts down and requests shutdown at zero.
    struct Countdown(u32);

    impl System for Countdown {
        const STAGES: Stages = Stages::of(Stage::Update).with(Stage::Destroy);

        fn on_update(&mut self, ctx: &Context) {
            self.0 = self.0.saturating_sub(1);
            if self.0 == 0 {
                ctx.request_shutdown();
            }
        }

        fn on_destroy(&mut self, _ctx: &Context) {
            record("countdown:destroy");
        }
    }

    fn countdown_init(ctx: Context, _dispatch: &Dispatch) {
        record("countdown:init");
        ctx.register_system(Countdown(3)).unwrap();
    }

    fn countdown_fini() {
        record("countdown:fini");
    }

    fn config() -> KernelConfig {
        KernelConfig::default()
            .with_tick_rate(0.0)
            .with_module("countdown")
            .without_signals()
    }

    fn kernel(config: KernelConfig) -> Kernel {
        let opener = StaticOpener::default().with("countdown", countdown_init, countdown_fini);
        let loader = ModuleLoader::with_opener(&config.module_dir, opener);
        Kernel::with_loader(config, loader)
    }

    #[test]
    fn test_kernel_lifecycle() {
        take_calls();
        let mut kernel = kernel(config());
        kernel.start().unwrap();
        assert_eq!(kernel.modules().collect::<Vec<_>>(), vec!["countdown"]);

        let beats = kernel.run();
        // Three counting beats plus the teardown beat.
        assert_eq!(beats, 4);
        assert_eq!(kernel.context().system_count(), 0);

        kernel.shutdown();
        kernel.shutdown();
        assert_eq!(kernel.modules().count(), 0);
        assert_eq!(
            take_calls(),
            vec!["countdown:init", "countdown:destroy", "countdown:fini"]
        );
    }

    #[test]
    fn test_tick_rate_applied_to_context() {
        let kernel = kernel(config().with_tick_rate(25.0));
        assert!((kernel.context().tick_rate() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_beat_limit_stops_run() {
        take_calls();
        let config = KernelConfig::default()
            .with_tick_rate(0.0)
            .with_max_beats(2)
            .without_signals();
        let mut kernel = kernel(config);
        kernel.start().unwrap();
        assert_eq!(kernel.run(), 3);
        assert!(kernel.context().is_shutdown_requested());
    }

    #[test]
    fn test_failed_start_unloads_modules() {
        take_calls();
        let dir = tempfile::tempdir().unwrap();
        let config = config().with_module_dir(dir.path()).with_module("absent");
        let mut kernel = kernel(config);

        let err = kernel.start().unwrap_err();
        assert!(matches!(err, KernelError::Module(ModuleLoadError::Open { .. })));
        assert_eq!(kernel.modules().count(), 0);
        assert_eq!(kernel.context().system_count(), 0);
        // Purged, so the destroy hook never ran.
        assert_eq!(take_calls(), vec!["countdown:init", "countdown:fini"]);
    }

    #[test]
    fn test_drop_shuts_down() {
        take_calls();
        {
            let mut kernel = kernel(config());
            kernel.start().unwrap();
        }
        assert_eq!(take_calls(), vec!["countdown:init", "countdown:fini"]);
    }
}
