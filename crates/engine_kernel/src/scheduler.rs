//! Lifecycle scheduler: stage queues, hook bindings and stage execution.
//!
//! The scheduler keeps one FIFO queue of pending system indices per stage
//! and one binding table per stage (a hook slot per system index). The
//! heartbeat drains the stages in fixed order:
//!
//! 1. **Create**: queue drained; create hook runs; system becomes Created
//!    and gets an Execute action queued.
//! 2. **Execute**: queue drained; one-shot post-create hook runs.
//! 3. **Tick**: every created system with a bound tick hook.
//! 4. **Update**: same as Tick, only when a fixed step is due.
//! 5. **Destroy**: queue drained; destroy hook runs; entry is erased.
//!
//! No `RefCell` borrow of the context is held while a hook runs, so hooks may
//! freely register, remove, trigger and enqueue.

use std::any::Any;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::trace;

use crate::context::Context;
use crate::registry::SystemState;
use crate::system::{HookFn, Stage};

/// Per-stage queues and hook binding tables.
#[derive(Default)]
pub(crate) struct LifecycleScheduler {
    queues: [VecDeque<usize>; Stage::COUNT],
    bindings: [Vec<Option<HookFn>>; Stage::COUNT],
}

impl LifecycleScheduler {
    /// Queue a lifecycle action for the system at `index`.
    pub(crate) fn enqueue(&mut self, stage: Stage, index: usize) {
        self.queues[stage.index()].push_back(index);
    }

    /// Pop the next pending action for `stage`.
    pub(crate) fn next(&mut self, stage: Stage) -> Option<usize> {
        self.queues[stage.index()].pop_front()
    }

    /// Number of pending actions for `stage`.
    pub(crate) fn pending(&self, stage: Stage) -> usize {
        self.queues[stage.index()].len()
    }

    /// Bind `hook` to `stage` for the system at `index`.
    pub(crate) fn bind(&mut self, index: usize, stage: Stage, hook: HookFn) {
        let table = &mut self.bindings[stage.index()];
        if table.len() <= index {
            table.resize(index + 1, None);
        }
        table[index] = Some(hook);
    }

    /// Remove every hook bound for the system at `index`.
    pub(crate) fn unbind(&mut self, index: usize) {
        for table in &mut self.bindings {
            if let Some(slot) = table.get_mut(index) {
                *slot = None;
            }
        }
    }

    /// The hook bound to `stage` for the system at `index`.
    pub(crate) fn hook(&self, stage: Stage, index: usize) -> Option<HookFn> {
        self.bindings[stage.index()].get(index).copied().flatten()
    }

    /// Snapshot of every binding for `stage`, in index order.
    pub(crate) fn bound(&self, stage: Stage) -> Vec<(usize, HookFn)> {
        self.bindings[stage.index()]
            .iter()
            .enumerate()
            .filter_map(|(index, hook)| hook.map(|hook| (index, hook)))
            .collect()
    }

    /// Drop every queued action and binding.
    pub(crate) fn clear(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        for table in &mut self.bindings {
            table.clear();
        }
    }
}

impl Context {
    /// Drain the Create queue. Returns the number of systems created.
    pub(crate) fn drain_create(&self) -> usize {
        let mut created = 0;
        loop {
            let next = self.inner.scheduler.borrow_mut().next(Stage::Create);
            let Some(index) = next else {
                break;
            };

            let pending = {
                let systems = self.inner.systems.borrow();
                systems
                    .get(index)
                    .filter(|entry| !entry.state.is_created())
                    .map(|entry| (Rc::clone(&entry.value), entry.name))
            };
            let Some((value, name)) = pending else {
                continue;
            };

            self.invoke(Stage::Create, index, &*value);

            if let Some(entry) = self.inner.systems.borrow_mut().get_mut(index) {
                entry.state = match entry.state {
                    SystemState::PendingDestroy { .. } => {
                        SystemState::PendingDestroy { created: true }
                    }
                    _ => SystemState::Created,
                };
            }
            self.inner
                .scheduler
                .borrow_mut()
                .enqueue(Stage::Execute, index);
            trace!(system = name, index, "system created");
            created += 1;
        }
        created
    }

    /// Drain the Execute queue. Returns the number of actions processed.
    pub(crate) fn drain_execute(&self) -> usize {
        let mut executed = 0;
        loop {
            let next = self.inner.scheduler.borrow_mut().next(Stage::Execute);
            let Some(index) = next else {
                break;
            };
            if let Some(value) = self.created_system(index) {
                self.invoke(Stage::Execute, index, &*value);
                executed += 1;
            }
        }
        executed
    }

    /// Run the `stage` hook of every created system that binds one.
    pub(crate) fn run_bound(&self, stage: Stage) -> usize {
        let bound = self.inner.scheduler.borrow().bound(stage);
        let mut ran = 0;
        for (index, hook) in bound {
            if let Some(value) = self.created_system(index) {
                hook(&*value, self);
                ran += 1;
            }
        }
        ran
    }

    /// Drain the Destroy queue. Returns the number of systems destroyed.
    pub(crate) fn drain_destroy(&self) -> usize {
        let mut destroyed = 0;
        loop {
            let next = self.inner.scheduler.borrow_mut().next(Stage::Destroy);
            let Some(index) = next else {
                break;
            };

            let pending = {
                let systems = self.inner.systems.borrow();
                systems.get(index).and_then(|entry| match entry.state {
                    SystemState::PendingDestroy { created } => {
                        Some((Rc::clone(&entry.value), created))
                    }
                    _ => None,
                })
            };
            let Some((value, created)) = pending else {
                continue;
            };

            if created {
                self.invoke(Stage::Destroy, index, &*value);
            }

            self.inner.scheduler.borrow_mut().unbind(index);
            let entry = self.inner.systems.borrow_mut().remove(index);
            if let Some(entry) = &entry {
                trace!(system = entry.name, index, "system destroyed");
            }
            // The system is dropped here, outside any borrow.
            drop(entry);
            drop(value);
            destroyed += 1;
        }
        destroyed
    }

    /// The value of the system at `index` if its create hook has run.
    fn created_system(&self, index: usize) -> Option<Rc<dyn Any>> {
        self.inner
            .systems
            .borrow()
            .get(index)
            .filter(|entry| entry.state.is_created())
            .map(|entry| Rc::clone(&entry.value))
    }

    fn invoke(&self, stage: Stage, index: usize, value: &dyn Any) {
        let hook = self.inner.scheduler.borrow().hook(stage, index);
        if let Some(hook) = hook {
            hook(value, self);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::system::{Stages, System};

    thread_local! {
        static TRACE: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    fn record(entry: impl Into<String>) {
        TRACE.with(|trace| trace.borrow_mut().push(entry.into()));
    }

    fn take_trace() -> Vec<String> {
        TRACE.with(|trace| std::mem::take(&mut *trace.borrow_mut()))
    }

    struct Logger;

    impl System for Logger {
        const STAGES: Stages = Stages::ALL;

        fn on_create(&mut self, _ctx: &Context) {
            record("logger:create");
        }

        fn on_execute(&mut self, _ctx: &Context) {
            record("logger:execute");
        }

        fn on_tick(&mut self, _ctx: &Context) {
            record("logger:tick");
        }

        fn on_update(&mut self, _ctx: &Context) {
            record("logger:update");
        }

        fn on_destroy(&mut self, _ctx: &Context) {
            record("logger:destroy");
        }
    }

    /// Registers `Logger` from its own create hook.
    struct Bootstrap;

    impl System for Bootstrap {
        const STAGES: Stages = Stages::of(Stage::Create).with(Stage::Destroy);

        fn on_create(&mut self, ctx: &Context) {
            record("bootstrap:create");
            ctx.register_system(Logger).unwrap();
        }

        fn on_destroy(&mut self, ctx: &Context) {
            record("bootstrap:destroy");
            ctx.remove_system::<Logger>().unwrap();
        }
    }

    #[test]
    fn test_empty_scheduler() {
        let scheduler = LifecycleScheduler::default();
        for stage in Stage::ALL {
            assert_eq!(scheduler.pending(stage), 0);
            assert!(scheduler.bound(stage).is_empty());
        }
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut scheduler = LifecycleScheduler::default();
        scheduler.enqueue(Stage::Create, 3);
        scheduler.enqueue(Stage::Create, 1);
        scheduler.enqueue(Stage::Destroy, 2);
        assert_eq!(scheduler.next(Stage::Create), Some(3));
        assert_eq!(scheduler.next(Stage::Create), Some(1));
        assert_eq!(scheduler.next(Stage::Create), None);
        assert_eq!(scheduler.pending(Stage::Destroy), 1);
    }

    #[test]
    fn test_bind_and_unbind() {
        fn noop(_: &dyn Any, _: &Context) {}

        let mut scheduler = LifecycleScheduler::default();
        scheduler.bind(2, Stage::Tick, noop);
        scheduler.bind(0, Stage::Tick, noop);
        scheduler.bind(2, Stage::Update, noop);
        let indices: Vec<usize> = scheduler
            .bound(Stage::Tick)
            .into_iter()
            .map(|(index, _)| index)
            .collect();
        assert_eq!(indices, vec![0, 2]);

        scheduler.unbind(2);
        assert!(scheduler.hook(Stage::Tick, 2).is_none());
        assert!(scheduler.hook(Stage::Update, 2).is_none());
        assert!(scheduler.hook(Stage::Tick, 0).is_some());
    }

    #[test]
    fn test_full_lifecycle_order() {
        take_trace();
        let ctx = Context::new();
        ctx.register_system(Logger).unwrap();

        assert_eq!(ctx.drain_create(), 1);
        assert_eq!(ctx.drain_execute(), 1);
        assert_eq!(ctx.run_bound(Stage::Tick), 1);
        assert_eq!(ctx.run_bound(Stage::Update), 1);
        ctx.remove_system::<Logger>().unwrap();
        assert_eq!(ctx.drain_destroy(), 1);

        assert_eq!(
            take_trace(),
            vec![
                "logger:create",
                "logger:execute",
                "logger:tick",
                "logger:update",
                "logger:destroy",
            ]
        );
        assert!(!ctx.has_system::<Logger>());
    }

    #[test]
    fn test_tick_skips_systems_not_yet_created() {
        take_trace();
        let ctx = Context::new();
        ctx.register_system(Logger).unwrap();
        assert_eq!(ctx.run_bound(Stage::Tick), 0);
        assert!(take_trace().is_empty());
    }

    #[test]
    fn test_hooks_may_register_and_remove() {
        take_trace();
        let ctx = Context::new();
        ctx.register_system(Bootstrap).unwrap();

        // Logger registered during the drain is created in the same drain.
        assert_eq!(ctx.drain_create(), 2);
        assert!(ctx.has_system::<Logger>());

        ctx.remove_system::<Bootstrap>().unwrap();
        assert_eq!(ctx.drain_destroy(), 2);
        assert_eq!(ctx.system_count(), 0);
        assert_eq!(
            take_trace(),
            vec![
                "bootstrap:create",
                "logger:create",
                "bootstrap:destroy",
                "logger:destroy",
            ]
        );
    }

    #[test]
    fn test_removed_before_create_still_pairs_hooks() {
        take_trace();
        let ctx = Context::new();
        ctx.register_system(Logger).unwrap();
        ctx.remove_system::<Logger>().unwrap();

        ctx.drain_create();
        ctx.drain_execute();
        ctx.drain_destroy();
        assert_eq!(
            take_trace(),
            vec!["logger:create", "logger:execute", "logger:destroy"]
        );
        assert_eq!(ctx.system_count(), 0);
    }

    #[test]
    fn test_destroyed_slot_can_be_refilled_by_same_type() {
        let ctx = Context::new();
        ctx.register_system(Logger).unwrap();
        ctx.drain_create();
        ctx.remove_system::<Logger>().unwrap();
        ctx.drain_destroy();

        ctx.register_system(Logger).unwrap();
        assert_eq!(ctx.inner.system_types.borrow().get::<Logger>(), Some(0));
        assert_eq!(ctx.inner.system_types.borrow().len(), 1);
        take_trace();
    }
}
