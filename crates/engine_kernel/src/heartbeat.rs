//! The heartbeat loop.
//!
//! One beat runs the lifecycle stages in fixed order:
//!
//! 1. Sample the clock and compute the delta since the previous beat.
//! 2. Drain the Create queue.
//! 3. Drain the Execute queue.
//! 4. Run every bound Tick hook.
//! 5. Run every bound Update hook, if more than a fixed step of
//!    `1 / tick_rate` has accumulated (every beat when the tick rate is `0`).
//! 6. Drain the Destroy queue.
//! 7. Sleep for the rest of the fixed step, if any.
//!
//! The loop checks the shutdown flag at the top of every beat. Once it is
//! raised, [`events::Finalize`] is triggered and every remaining system is
//! forced through Destroy before [`Heartbeat::run`] returns.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::context::Context;
use crate::events::{Finalize, Initialize};
use crate::system::Stage;

/// Upper bound on teardown passes. A destroy hook that keeps registering
/// new systems would otherwise hold the process open forever.
const MAX_TEARDOWN_PASSES: usize = 16;

/// What a single beat did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BeatReport {
    /// Systems whose Create stage ran.
    pub created: usize,
    /// Execute actions processed.
    pub executed: usize,
    /// Tick hooks invoked.
    pub ticked: usize,
    /// Whether a fixed step was due.
    pub update_due: bool,
    /// Update hooks invoked.
    pub updated: usize,
    /// Systems destroyed.
    pub destroyed: usize,
}

/// Drives the lifecycle stages of a [`Context`].
#[derive(Debug)]
pub struct Heartbeat {
    ctx: Context,
    beats: u64,
    /// Maximum number of beats to run (0 = unlimited).
    max_beats: u64,
}

impl Heartbeat {
    /// Create a heartbeat driving `ctx`.
    #[must_use]
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            beats: 0,
            max_beats: 0,
        }
    }

    /// Request shutdown after `max_beats` beats. `0` runs until shutdown is
    /// requested some other way.
    #[must_use]
    pub fn with_max_beats(mut self, max_beats: u64) -> Self {
        self.max_beats = max_beats;
        self
    }

    /// Number of beats run so far.
    #[must_use]
    pub fn beats(&self) -> u64 {
        self.beats
    }

    /// The driven context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Run one beat, measuring delta time from the clock.
    pub fn beat(&mut self) -> BeatReport {
        let delta = self.ctx.inner.time.borrow_mut().sample(Instant::now());
        self.beat_with(delta)
    }

    /// Run one beat with an explicit delta time.
    pub fn beat_with(&mut self, delta: Duration) -> BeatReport {
        self.beats += 1;
        let update_due = self.ctx.inner.time.borrow_mut().advance(delta);

        let mut report = BeatReport {
            update_due,
            ..BeatReport::default()
        };
        report.created = self.ctx.drain_create();
        report.executed = self.ctx.drain_execute();
        report.ticked = self.ctx.run_bound(Stage::Tick);
        if update_due {
            report.updated = self.ctx.run_bound(Stage::Update);
        }
        report.destroyed = self.ctx.drain_destroy();
        report
    }

    /// Run until shutdown is requested, then tear every system down.
    pub fn run(&mut self) {
        let ctx = self.ctx.clone();
        info!(
            context = %ctx.id(),
            tick_rate = ctx.tick_rate(),
            max_beats = self.max_beats,
            "starting heartbeat"
        );

        ctx.inner.time.borrow_mut().reset(Instant::now());
        ctx.trigger_event(Initialize);

        while !ctx.is_shutdown_requested() {
            let start = Instant::now();
            self.beat();

            if self.max_beats > 0 && self.beats >= self.max_beats {
                info!(beats = self.beats, "beat limit reached");
                ctx.request_shutdown();
                continue;
            }

            self.pace(start);
        }

        self.teardown();
        info!(context = %ctx.id(), beats = self.beats, "heartbeat stopped");
    }

    /// Trigger [`Finalize`] and destroy every remaining system.
    fn teardown(&mut self) {
        let ctx = self.ctx.clone();
        debug!(context = %ctx.id(), systems = ctx.system_count(), "tearing down");
        ctx.trigger_event(Finalize);

        for _ in 0..MAX_TEARDOWN_PASSES {
            ctx.request_destroy_all();
            self.beat();
            if ctx.system_count() == 0 {
                return;
            }
        }
        warn!(
            systems = ctx.system_count(),
            passes = MAX_TEARDOWN_PASSES,
            "systems still registered after teardown"
        );
    }

    /// Sleep for the rest of the fixed step.
    fn pace(&self, start: Instant) {
        let Some(budget) = self.ctx.inner.time.borrow().fixed_step() else {
            return;
        };
        let elapsed = start.elapsed();
        if elapsed < budget {
            std::thread::sleep(budget - elapsed);
        } else {
            warn!(
                beat = self.beats,
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                "beat exceeded time budget"
            );
        }
    }
}
