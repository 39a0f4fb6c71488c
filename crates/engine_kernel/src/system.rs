//! The [`System`] trait and lifecycle stages.
//!
//! A system is any `'static` type registered into a [`Context`]. It may opt
//! into up to five lifecycle hooks. The opt-in is explicit and known at
//! compile time: a system lists its hooks in [`System::STAGES`], and the
//! registry binds exactly those hooks when the system is registered.
//!
//! ```rust
//! use engine_kernel::{Context, Stage, Stages, System};
//!
//! #[derive(Default)]
//! struct Counter {
//!     ticks: u64,
//! }
//!
//! impl System for Counter {
//!     const STAGES: Stages = Stages::of(Stage::Tick);
//!
//!     fn on_tick(&mut self, _ctx: &Context) {
//!         self.ticks += 1;
//!     }
//! }
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::fmt;

use crate::context::Context;

/// A lifecycle stage, in heartbeat execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// One-shot, when the Create queue is drained after registration.
    Create,
    /// One-shot, right after Create.
    Execute,
    /// Every heartbeat (variable step).
    Tick,
    /// Every fixed step of `1 / tick_rate` seconds.
    Update,
    /// One-shot, when the Destroy queue is drained after removal.
    Destroy,
}

impl Stage {
    /// Number of stages.
    pub const COUNT: usize = 5;

    /// All stages in execution order.
    pub const ALL: [Stage; Self::COUNT] = [
        Stage::Create,
        Stage::Execute,
        Stage::Tick,
        Stage::Update,
        Stage::Destroy,
    ];

    /// Position of the stage in execution order.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Lower-case stage name, used in log fields.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Stage::Create => "create",
            Stage::Execute => "execute",
            Stage::Tick => "tick",
            Stage::Update => "update",
            Stage::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of lifecycle stages.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Stages(u8);

impl Stages {
    /// No hooks.
    pub const NONE: Stages = Stages(0);

    /// Every hook.
    pub const ALL: Stages = Stages(0b1_1111);

    /// A set holding a single stage.
    #[must_use]
    pub const fn of(stage: Stage) -> Self {
        Stages(stage.bit())
    }

    /// This set plus `stage`.
    #[must_use]
    pub const fn with(self, stage: Stage) -> Self {
        Stages(self.0 | stage.bit())
    }

    /// Returns `true` if `stage` is in the set.
    #[must_use]
    pub const fn contains(self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the stages in execution order.
    pub fn iter(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |stage| self.contains(*stage))
    }
}

impl fmt::Debug for Stages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A unit of behaviour registered into a [`Context`].
///
/// Every hook has a no-op default. A hook only runs if its stage is listed
/// in [`System::STAGES`].
pub trait System: 'static {
    /// The lifecycle hooks this system opts into.
    const STAGES: Stages = Stages::NONE;

    fn on_create(&mut self, _ctx: &Context) {}

    fn on_execute(&mut self, _ctx: &Context) {}

    fn on_tick(&mut self, _ctx: &Context) {}

    fn on_update(&mut self, _ctx: &Context) {}

    fn on_destroy(&mut self, _ctx: &Context) {}
}

/// A type-erased hook: receives the system's storage cell and the context.
pub(crate) type HookFn = fn(&dyn Any, &Context);

/// The hook of `T` for `stage`.
pub(crate) fn hook_for<T: System>(stage: Stage) -> HookFn {
    match stage {
        Stage::Create => create_hook::<T> as HookFn,
        Stage::Execute => execute_hook::<T>,
        Stage::Tick => tick_hook::<T>,
        Stage::Update => update_hook::<T>,
        Stage::Destroy => destroy_hook::<T>,
    }
}

fn with_cell<T: System>(cell: &dyn Any, f: impl FnOnce(&mut T)) {
    if let Some(cell) = cell.downcast_ref::<RefCell<T>>() {
        f(&mut *cell.borrow_mut());
    }
}

fn create_hook<T: System>(cell: &dyn Any, ctx: &Context) {
    with_cell::<T>(cell, |system| system.on_create(ctx));
}

fn execute_hook<T: System>(cell: &dyn Any, ctx: &Context) {
    with_cell::<T>(cell, |system| system.on_execute(ctx));
}

fn tick_hook<T: System>(cell: &dyn Any, ctx: &Context) {
    with_cell::<T>(cell, |system| system.on_tick(ctx));
}

fn update_hook<T: System>(cell: &dyn Any, ctx: &Context) {
    with_cell::<T>(cell, |system| system.on_update(ctx));
}

fn destroy_hook<T: System>(cell: &dyn Any, ctx: &Context) {
    with_cell::<T>(cell, |system| system.on_destroy(ctx));
}
