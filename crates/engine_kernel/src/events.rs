//! Typed publish/subscribe with immediate and deferred delivery.
//!
//! Every event type `E` owns one dispatch slot, at the index the context's
//! event [`TypeIndexer`](crate::TypeIndexer) assigned to it. A slot holds the
//! immediate listeners of `E` and, independently, a FIFO queue of deferred
//! payloads.
//!
//! - [`Context::trigger_event`] delivers synchronously to the listeners
//!   subscribed when the dispatch starts. Listeners added or removed by a
//!   listener take effect from the next dispatch.
//! - [`Context::enqueue_event`] stores the payload; [`Context::update_event`]
//!   later triggers every payload queued at call time, in order.
//!
//! ```rust
//! use engine_kernel::Context;
//!
//! struct Scored(u32);
//!
//! let ctx = Context::new();
//! ctx.register_event(|_ctx, event: &Scored| assert_eq!(event.0, 3));
//! ctx.enqueue_event(Scored(3));
//! assert_eq!(ctx.update_event::<Scored>(), 1);
//! ```

use std::any::{Any, type_name};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::system::System;

/// Triggered once before the first heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Initialize;

/// Triggered once when shutdown is observed, before the teardown drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Finalize;

/// Identifies a subscribed listener, for [`Context::remove_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId {
    event: usize,
    serial: u64,
}

type Listener = Rc<dyn Fn(&Context, &dyn Any)>;

#[derive(Default)]
pub(crate) struct EventSlot {
    listeners: Vec<(u64, Listener)>,
    queue: VecDeque<Box<dyn Any>>,
}

/// Dispatch slots indexed by event type index.
#[derive(Default)]
pub(crate) struct EventBus {
    slots: Vec<EventSlot>,
    next_serial: u64,
}

impl EventBus {
    fn slot_mut(&mut self, index: usize) -> &mut EventSlot {
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, EventSlot::default);
        }
        &mut self.slots[index]
    }

    fn subscribe(&mut self, index: usize, listener: Listener) -> ListenerId {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.slot_mut(index).listeners.push((serial, listener));
        ListenerId {
            event: index,
            serial,
        }
    }

    fn unsubscribe(&mut self, id: ListenerId) -> Option<Listener> {
        let listeners = &mut self.slots.get_mut(id.event)?.listeners;
        let position = listeners
            .iter()
            .position(|(serial, _)| *serial == id.serial)?;
        Some(listeners.remove(position).1)
    }

    fn listeners(&self, index: usize) -> Vec<Listener> {
        self.slots
            .get(index)
            .map(|slot| {
                slot.listeners
                    .iter()
                    .map(|(_, listener)| Rc::clone(listener))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn take_queue(&mut self, index: usize) -> VecDeque<Box<dyn Any>> {
        self.slots
            .get_mut(index)
            .map(|slot| std::mem::take(&mut slot.queue))
            .unwrap_or_default()
    }

    /// Take every non-empty queue, in event-index order.
    fn take_queues(&mut self) -> Vec<(usize, VecDeque<Box<dyn Any>>)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter(|(_, slot)| !slot.queue.is_empty())
            .map(|(index, slot)| (index, std::mem::take(&mut slot.queue)))
            .collect()
    }

    /// Remove every slot, returning them so the caller can drop them
    /// outside the borrow.
    pub(crate) fn take_all(&mut self) -> Vec<EventSlot> {
        std::mem::take(&mut self.slots)
    }
}

impl Context {
    /// Subscribe `listener` to events of type `E`.
    pub fn register_event<E, F>(&self, listener: F) -> ListenerId
    where
        E: 'static,
        F: Fn(&Context, &E) + 'static,
    {
        let erased: Listener = Rc::new(move |ctx: &Context, payload: &dyn Any| {
            if let Some(event) = payload.downcast_ref::<E>() {
                listener(ctx, event);
            }
        });
        self.subscribe::<E>(erased)
    }

    /// Subscribe a method of the registered system `S` to events of type `E`.
    ///
    /// The system is looked up on every delivery. If it is not registered, or
    /// is already borrowed (the event was triggered from one of its own
    /// hooks), the delivery is skipped with a warning.
    pub fn register_event_method<E, S>(&self, method: fn(&mut S, &Context, &E)) -> ListenerId
    where
        E: 'static,
        S: System,
    {
        self.register_event(move |ctx: &Context, event: &E| {
            let Ok(system) = ctx.get_system::<S>() else {
                warn!(
                    event = type_name::<E>(),
                    system = type_name::<S>(),
                    "listener system is not registered, delivery skipped"
                );
                return;
            };
            let Some(mut guard) = system.try_borrow_mut() else {
                warn!(
                    event = type_name::<E>(),
                    system = type_name::<S>(),
                    "listener system is busy, delivery skipped"
                );
                return;
            };
            method(&mut *guard, ctx, event);
        })
    }

    /// Unsubscribe a listener of `E`. Returns `false` if it was not
    /// subscribed.
    pub fn remove_event<E: 'static>(&self, id: ListenerId) -> bool {
        let index = self.inner.event_types.borrow().get::<E>();
        if index != Some(id.event) {
            return false;
        }
        // Dropped after the borrow is released.
        let removed = self.inner.events.borrow_mut().unsubscribe(id);
        let found = removed.is_some();
        drop(removed);
        if found {
            debug!(event = type_name::<E>(), "listener removed");
        }
        found
    }

    /// Deliver `event` synchronously to every listener of `E`. Returns the
    /// number of listeners invoked.
    pub fn trigger_event<E: 'static>(&self, event: E) -> usize {
        let index = self.inner.event_types.borrow().get::<E>();
        let Some(index) = index else {
            trace!(event = type_name::<E>(), "event has no listeners");
            return 0;
        };
        self.dispatch(index, &event)
    }

    /// Queue `event` for delivery by the next [`Context::update_event`].
    pub fn enqueue_event<E: 'static>(&self, event: E) {
        let index = self.inner.event_types.borrow_mut().index_of::<E>();
        self.inner
            .events
            .borrow_mut()
            .slot_mut(index)
            .queue
            .push_back(Box::new(event));
    }

    /// Deliver every payload of `E` queued at call time, in enqueue order.
    /// Returns the number of payloads delivered.
    ///
    /// Payloads enqueued by listeners during the drain stay queued.
    pub fn update_event<E: 'static>(&self) -> usize {
        let index = self.inner.event_types.borrow().get::<E>();
        let Some(index) = index else {
            return 0;
        };
        let queue = self.inner.events.borrow_mut().take_queue(index);
        let delivered = queue.len();
        for payload in queue {
            self.dispatch(index, &*payload);
        }
        delivered
    }

    /// Drain the deferred queue of every event type, in event-index order.
    /// Returns the number of payloads delivered.
    pub fn update_events(&self) -> usize {
        let queues = self.inner.events.borrow_mut().take_queues();
        let mut delivered = 0;
        for (index, queue) in queues {
            delivered += queue.len();
            for payload in queue {
                self.dispatch(index, &*payload);
            }
        }
        delivered
    }

    /// Number of payloads of `E` waiting in the deferred queue.
    #[must_use]
    pub fn pending_events<E: 'static>(&self) -> usize {
        let index = self.inner.event_types.borrow().get::<E>();
        index.map_or(0, |index| {
            self.inner
                .events
                .borrow()
                .slots
                .get(index)
                .map_or(0, |slot| slot.queue.len())
        })
    }

    /// Number of listeners subscribed to `E`.
    #[must_use]
    pub fn listener_count<E: 'static>(&self) -> usize {
        let index = self.inner.event_types.borrow().get::<E>();
        index.map_or(0, |index| {
            self.inner
                .events
                .borrow()
                .slots
                .get(index)
                .map_or(0, |slot| slot.listeners.len())
        })
    }

    fn subscribe<E: 'static>(&self, listener: Listener) -> ListenerId {
        let index = self.inner.event_types.borrow_mut().index_of::<E>();
        let id = self.inner.events.borrow_mut().subscribe(index, listener);
        debug!(event = type_name::<E>(), index, "listener registered");
        id
    }

    fn dispatch(&self, index: usize, payload: &dyn Any) -> usize {
        let listeners = self.inner.events.borrow().listeners(index);
        for listener in &listeners {
            listener(self, payload);
        }
        listeners.len()
    }
}
