//! # engine_kernel
//!
//! Runtime kernel for services composed of dynamically loaded modules.
//!
//! The host creates a [`Kernel`], which owns one shared [`Context`]. Every
//! module receives a handle to that context in its initializer and registers
//! its systems and event listeners into it. The heartbeat then drives every
//! registered system through its lifecycle:
//!
//! ```text
//! register ──▶ Create ──▶ Execute ──▶ Tick / Update (every beat) ──▶ Destroy
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use engine_kernel::{Context, Heartbeat, Stage, Stages, System};
//!
//! struct Countdown(u32);
//!
//! impl System for Countdown {
//!     const STAGES: Stages = Stages::of(Stage::Update);
//!
//!     fn on_update(&mut self, ctx: &Context) {
//!         self.0 = self.0.saturating_sub(1);
//!         if self.0 == 0 {
//!             ctx.request_shutdown();
//!         }
//!     }
//! }
//!
//! let ctx = Context::new();
//! ctx.set_tick_rate(0.0);
//! ctx.register_system(Countdown(3)).unwrap();
//!
//! Heartbeat::new(ctx.clone()).run();
//! assert_eq!(ctx.system_count(), 0);
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod kernel;
pub mod module;
pub mod registry;
pub mod scheduler;
pub mod signal;
pub mod system;
pub mod type_index;

pub use config::KernelConfig;
pub use context::{Context, ShutdownHandle};
pub use error::{KernelError, LookupError, ModuleLoadError, RegistrationError};
pub use events::{Finalize, Initialize, ListenerId};
pub use heartbeat::{BeatReport, Heartbeat};
pub use kernel::Kernel;
pub use module::{
    BUILD_TAG, DynLib, ModuleFini, ModuleInit, ModuleLoader, ModuleOpener, ModuleTag,
    NativeOpener, StaticOpener,
};
pub use registry::SystemRef;
pub use signal::{SignalBridge, install_panic_hook};
pub use system::{Stage, Stages, System};
pub use type_index::{TypeIndexer, TypeKey};
