//! Sample module exercising the lifecycle hooks and both event paths.
//!
//! On Execute the greeter queues a [`Greeting`]; it delivers queued greetings
//! from its Tick hook and says goodbye when [`Finalize`] fires.

use engine_kernel::{
    Context, Finalize, Initialize, ListenerId, Stage, Stages, System, declare_module,
};
use tracing::{debug, info};

/// A deferred event carrying a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub from: String,
    pub text: String,
}

#[derive(Default)]
pub struct Greeter {
    greeted: u32,
    listener: Option<ListenerId>,
}

impl Greeter {
    /// Greetings delivered so far.
    #[must_use]
    pub fn greeted(&self) -> u32 {
        self.greeted
    }

    fn on_finalize(&mut self, _ctx: &Context, _event: &Finalize) {
        info!(greeted = self.greeted, "goodbye");
    }
}

impl System for Greeter {
    const STAGES: Stages = Stages::of(Stage::Create)
        .with(Stage::Execute)
        .with(Stage::Tick)
        .with(Stage::Destroy);

    fn on_create(&mut self, ctx: &Context) {
        self.listener = Some(ctx.register_event(|ctx: &Context, greeting: &Greeting| {
            info!(from = %greeting.from, "{}", greeting.text);
            ctx.trigger_event(Delivered);
        }));
        debug!(args = ctx.args().len(), "greeter created");
    }

    fn on_execute(&mut self, ctx: &Context) {
        ctx.enqueue_event(Greeting {
            from: "greeter".to_string(),
            text: "hello from a module".to_string(),
        });
    }

    fn on_tick(&mut self, ctx: &Context) {
        let delivered = ctx.update_event::<Greeting>();
        self.greeted += u32::try_from(delivered).unwrap_or(u32::MAX);
    }

    fn on_destroy(&mut self, ctx: &Context) {
        if let Some(id) = self.listener.take() {
            ctx.remove_event::<Greeting>(id);
        }
        debug!("greeter destroyed");
    }
}

/// Triggered once per delivered greeting.
#[derive(Debug, Clone, Copy)]
pub struct Delivered;

fn init(ctx: Context) {
    if let Err(err) = ctx.register_system(Greeter::default()) {
        tracing::error!(%err, "greeter not registered");
        return;
    }
    ctx.register_event(|_ctx: &Context, _event: &Initialize| info!("greeter online"));
    ctx.register_event_method(Greeter::on_finalize);
}

fn fini() {
    debug!("greeter module unloaded");
}

declare_module!(init = init, fini = fini);

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use engine_kernel::Heartbeat;

    use super::*;

    #[test]
    fn test_queued_greeting_is_delivered_on_tick() {
        let ctx = Context::new();
        init(ctx.clone());
        let delivered = Rc::new(Cell::new(0));
        let sink = Rc::clone(&delivered);
        ctx.register_event(move |_ctx: &Context, _event: &Delivered| sink.set(sink.get() + 1));

        let mut heartbeat = Heartbeat::new(ctx.clone());
        heartbeat.beat();

        assert_eq!(delivered.get(), 1);
        assert_eq!(ctx.pending_events::<Greeting>(), 0);
        let greeted = ctx.with_system(|greeter: &mut Greeter| greeter.greeted()).unwrap();
        assert_eq!(greeted, 1);
    }

    #[test]
    fn test_destroy_removes_listener() {
        let ctx = Context::new();
        init(ctx.clone());
        let mut heartbeat = Heartbeat::new(ctx.clone());
        heartbeat.beat();
        assert_eq!(ctx.listener_count::<Greeting>(), 1);

        ctx.remove_system::<Greeter>().unwrap();
        heartbeat.beat();
        assert_eq!(ctx.listener_count::<Greeting>(), 0);
        assert!(!ctx.has_system::<Greeter>());
    }

    #[test]
    fn test_run_until_beat_limit() {
        let ctx = Context::new();
        init(ctx.clone());
        let mut heartbeat = Heartbeat::new(ctx.clone()).with_max_beats(2);
        heartbeat.run();
        assert_eq!(ctx.system_count(), 0);
    }
}
