//! The shared runtime state.
//!
//! A [`Context`] is a cheap, reference-counted handle. The host creates one,
//! and every dynamically loaded module receives a clone of it in its
//! initializer, so systems and events registered by any module land in the
//! same registry.
//!
//! The context is single-threaded (`!Send`): the heartbeat thread owns it.
//! The only piece that crosses threads is the shutdown flag, exposed through
//! [`ShutdownHandle`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::EventBus;
use crate::registry::SystemRegistry;
use crate::scheduler::LifecycleScheduler;
use crate::type_index::TypeIndexer;

/// Thread-safe handle to a context's shutdown flag.
///
/// Setting the flag is the only thing signal handlers and other threads may
/// do to a running kernel. The heartbeat observes it at the top of each
/// iteration.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Raise the shutdown flag.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn downgrade(&self) -> Weak<AtomicBool> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(flag: &Weak<AtomicBool>) -> Option<Self> {
        flag.upgrade().map(Self)
    }
}

/// Heartbeat timing state.
#[derive(Debug)]
pub(crate) struct Timing {
    start: Instant,
    now: Instant,
    previous: Instant,
    delta: Duration,
    tick_rate: f64,
    accumulator: Duration,
}

impl Timing {
    fn new(now: Instant) -> Self {
        Self {
            start: now,
            now,
            previous: now,
            delta: Duration::ZERO,
            tick_rate: 0.0,
            accumulator: Duration::ZERO,
        }
    }

    /// Restart delta measurement from `now`.
    pub(crate) fn reset(&mut self, now: Instant) {
        self.now = now;
        self.previous = now;
        self.accumulator = Duration::ZERO;
    }

    /// Sample the clock and return the time since the previous sample.
    pub(crate) fn sample(&mut self, now: Instant) -> Duration {
        self.now = now;
        let delta = now.saturating_duration_since(self.previous);
        self.previous = now;
        delta
    }

    /// Record `delta` as the current beat's delta and feed the fixed-step
    /// accumulator. Returns `true` if the fixed-step stage is due.
    pub(crate) fn advance(&mut self, delta: Duration) -> bool {
        self.delta = delta;
        let Some(step) = self.fixed_step() else {
            return true;
        };
        self.accumulator += delta;
        if self.accumulator > step {
            self.accumulator -= step;
            true
        } else {
            false
        }
    }

    /// Length of one fixed step, or `None` when no tick rate is configured.
    pub(crate) fn fixed_step(&self) -> Option<Duration> {
        fixed_step(self.tick_rate)
    }
}

/// Length of one fixed step at `tick_rate` Hz.
///
/// `None` for a rate of `0` and for rates whose step does not fit in a
/// [`Duration`].
pub(crate) fn fixed_step(tick_rate: f64) -> Option<Duration> {
    if tick_rate > 0.0 {
        Duration::try_from_secs_f64(1.0 / tick_rate).ok()
    } else {
        None
    }
}

pub(crate) struct ContextInner {
    pub(crate) id: Uuid,
    pub(crate) system_types: RefCell<TypeIndexer>,
    pub(crate) event_types: RefCell<TypeIndexer>,
    pub(crate) systems: RefCell<SystemRegistry>,
    pub(crate) scheduler: RefCell<LifecycleScheduler>,
    pub(crate) events: RefCell<EventBus>,
    pub(crate) args: RefCell<Rc<[String]>>,
    pub(crate) time: RefCell<Timing>,
    pub(crate) shutdown: ShutdownHandle,
}

/// Shared, reference-counted runtime state.
///
/// Cloning a `Context` clones the handle, not the state. Operations are
/// split across modules: registration lives in [`registry`](crate::registry),
/// events in [`events`](crate::events), stage execution in
/// [`scheduler`](crate::scheduler).
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Rc<ContextInner>,
}

impl Context {
    /// Create a fresh, empty context.
    #[must_use]
    pub fn new() -> Self {
        let ctx = Self {
            inner: Rc::new(ContextInner {
                id: Uuid::new_v4(),
                system_types: RefCell::new(TypeIndexer::new()),
                event_types: RefCell::new(TypeIndexer::new()),
                systems: RefCell::new(SystemRegistry::default()),
                scheduler: RefCell::new(LifecycleScheduler::default()),
                events: RefCell::new(EventBus::default()),
                args: RefCell::new(Rc::from(Vec::new())),
                time: RefCell::new(Timing::new(Instant::now())),
                shutdown: ShutdownHandle::default(),
            }),
        };
        debug!(context = %ctx.id(), "context created");
        ctx
    }

    /// Unique identifier of this context instance.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Returns `true` if both handles refer to the same context.
    #[must_use]
    pub fn same_as(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Store a snapshot of the process arguments. No parsing is performed.
    pub fn set_args<I, S>(&self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        *self.inner.args.borrow_mut() = Rc::from(args);
    }

    /// The argument snapshot stored with [`Context::set_args`].
    #[must_use]
    pub fn args(&self) -> Rc<[String]> {
        Rc::clone(&self.inner.args.borrow())
    }

    /// Set the target frequency of fixed-step Update hooks, in Hz.
    ///
    /// `0` makes Update fire on every heartbeat. Negative or non-finite
    /// values, and rates too small for their step to fit in a [`Duration`],
    /// are treated as `0`.
    pub fn set_tick_rate(&self, tick_rate: f64) {
        let valid = tick_rate == 0.0 || fixed_step(tick_rate).is_some();
        let tick_rate = if valid {
            tick_rate
        } else {
            warn!(tick_rate, "invalid tick rate, falling back to 0");
            0.0
        };
        self.inner.time.borrow_mut().tick_rate = tick_rate;
    }

    /// The configured tick rate in Hz.
    #[must_use]
    pub fn tick_rate(&self) -> f64 {
        self.inner.time.borrow().tick_rate
    }

    /// Delta time of the current heartbeat, in seconds.
    #[must_use]
    pub fn time_delta(&self) -> f64 {
        self.inner.time.borrow().delta.as_secs_f64()
    }

    /// Seconds between context creation and the latest clock sample.
    #[must_use]
    pub fn time_elapsed(&self) -> f64 {
        let time = self.inner.time.borrow();
        time.now.duration_since(time.start).as_secs_f64()
    }

    /// Ask the heartbeat to stop after its next teardown drain.
    pub fn request_shutdown(&self) {
        if !self.inner.shutdown.is_requested() {
            debug!(context = %self.id(), "shutdown requested");
        }
        self.inner.shutdown.request();
    }

    /// Returns `true` once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.shutdown.is_requested()
    }

    /// A `Send` handle to the shutdown flag, for signal handlers and other
    /// threads.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.inner.shutdown.clone()
    }

    /// Drop every system, hook binding, listener and queued event without
    /// running any hook.
    ///
    /// Module libraries must not be released while the context still holds
    /// values whose code lives in them; the loader purges before unloading.
    pub fn purge(&self) {
        // Dropped after the borrows are released.
        let systems = self.inner.systems.borrow_mut().take_all();
        self.inner.scheduler.borrow_mut().clear();
        let events = self.inner.events.borrow_mut().take_all();
        debug!(
            context = %self.id(),
            systems = systems.len(),
            events = events.len(),
            "context purged"
        );
        drop(systems);
        drop(events);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("systems", &self.system_count())
            .field("tick_rate", &self.tick_rate())
            .field("shutdown", &self.is_shutdown_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creation() {
        let ctx = Context::new();
        assert_eq!(ctx.system_count(), 0);
        assert!(ctx.args().is_empty());
        assert!(!ctx.is_shutdown_requested());
        assert!(ctx.time_delta().abs() < f64::EPSILON);
    }

    #[test]
    fn test_clones_share_state() {
        let ctx = Context::new();
        let other = ctx.clone();
        other.set_tick_rate(30.0);
        assert!(ctx.same_as(&other));
        assert_eq!(ctx.id(), other.id());
        assert!((ctx.tick_rate() - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_independent_contexts() {
        let a = Context::new();
        let b = Context::new();
        assert!(!a.same_as(&b));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_args_snapshot() {
        let ctx = Context::new();
        ctx.set_args(["host", "--app", "demo"]);
        let args = ctx.args();
        assert_eq!(&*args, &["host", "--app", "demo"]);

        ctx.set_args(Vec::<String>::new());
        assert_eq!(args.len(), 3, "earlier snapshots are unaffected");
        assert!(ctx.args().is_empty());
    }

    #[test]
    fn test_invalid_tick_rate_falls_back_to_zero() {
        let ctx = Context::new();
        ctx.set_tick_rate(-5.0);
        assert_eq!(ctx.tick_rate(), 0.0);
        ctx.set_tick_rate(f64::NAN);
        assert_eq!(ctx.tick_rate(), 0.0);
        ctx.set_tick_rate(1e-20);
        assert_eq!(ctx.tick_rate(), 0.0);
        ctx.set_tick_rate(f64::MIN_POSITIVE / 4.0);
        assert_eq!(ctx.tick_rate(), 0.0);
    }

    #[test]
    fn test_shutdown_handle_crosses_threads() {
        let ctx = Context::new();
        let handle = ctx.shutdown_handle();
        std::thread::spawn(move || handle.request())
            .join()
            .unwrap();
        assert!(ctx.is_shutdown_requested());
    }

    #[test]
    fn test_timing_without_tick_rate_always_due() {
        let mut time = Timing::new(Instant::now());
        assert!(time.fixed_step().is_none());
        assert!(time.advance(Duration::from_millis(1)));
        assert!(time.advance(Duration::ZERO));
    }

    #[test]
    fn test_timing_accumulates_fixed_steps() {
        let mut time = Timing::new(Instant::now());
        time.tick_rate = 4.0;
        assert_eq!(time.fixed_step(), Some(Duration::from_millis(250)));

        let due: Vec<bool> = (0..6)
            .map(|_| time.advance(Duration::from_millis(90)))
            .collect();
        assert_eq!(due, vec![false, false, true, false, false, true]);
        assert_eq!(time.accumulator, Duration::from_millis(40));
    }

    #[test]
    fn test_timing_needs_more_than_a_full_step() {
        let mut time = Timing::new(Instant::now());
        time.tick_rate = 4.0;
        assert!(!time.advance(Duration::from_millis(250)));
        assert!(time.advance(Duration::from_millis(1)));
        assert_eq!(time.accumulator, Duration::from_millis(1));
    }

    #[test]
    fn test_unrepresentable_step_is_not_a_fixed_step() {
        assert_eq!(fixed_step(0.0), None);
        assert_eq!(fixed_step(1e-20), None);
        assert_eq!(fixed_step(f64::MIN_POSITIVE / 4.0), None);
        assert_eq!(fixed_step(2.0), Some(Duration::from_millis(500)));

        let mut time = Timing::new(Instant::now());
        time.tick_rate = 1e-20;
        assert!(time.advance(Duration::from_millis(1)));
    }

    #[test]
    fn test_timing_sample_measures_delta() {
        let start = Instant::now();
        let mut time = Timing::new(start);
        let delta = time.sample(start + Duration::from_millis(5));
        assert_eq!(delta, Duration::from_millis(5));
        let delta = time.sample(start + Duration::from_millis(12));
        assert_eq!(delta, Duration::from_millis(7));
    }
}
