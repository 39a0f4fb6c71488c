//! Sample module: counts fixed steps down and stops the host at zero.

use engine_kernel::{Context, Stage, Stages, System, declare_module};
use tracing::{debug, info};

/// Fixed steps before shutdown is requested.
pub const DEFAULT_STEPS: u32 = 300;

pub struct Countdown {
    remaining: u32,
}

impl Countdown {
    #[must_use]
    pub fn new(steps: u32) -> Self {
        Self { remaining: steps }
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl System for Countdown {
    const STAGES: Stages = Stages::of(Stage::Create).with(Stage::Update);

    fn on_create(&mut self, ctx: &Context) {
        info!(
            steps = self.remaining,
            tick_rate = ctx.tick_rate(),
            "countdown started"
        );
    }

    fn on_update(&mut self, ctx: &Context) {
        if self.remaining == 0 {
            return;
        }
        self.remaining -= 1;
        if self.remaining % 60 == 0 {
            debug!(remaining = self.remaining, elapsed = ctx.time_elapsed(), "countdown");
        }
        if self.remaining == 0 {
            info!("countdown finished, requesting shutdown");
            ctx.request_shutdown();
        }
    }
}

fn init(ctx: Context) {
    if let Err(err) = ctx.register_system(Countdown::new(DEFAULT_STEPS)) {
        tracing::error!(%err, "countdown not registered");
    }
}

fn fini() {}

declare_module!(init = init, fini = fini);

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use engine_kernel::Heartbeat;

    use super::*;

    #[test]
    fn test_counts_fixed_steps() {
        let ctx = Context::new();
        ctx.set_tick_rate(4.0);
        ctx.register_system(Countdown::new(3)).unwrap();

        let mut heartbeat = Heartbeat::new(ctx.clone());
        let step = Duration::from_millis(300);
        heartbeat.beat_with(step);
        heartbeat.beat_with(step);
        assert_eq!(ctx.with_system(|countdown: &mut Countdown| countdown.remaining()).unwrap(), 1);
        assert!(!ctx.is_shutdown_requested());

        heartbeat.beat_with(step);
        assert!(ctx.is_shutdown_requested());
    }

    #[test]
    fn test_short_beats_do_not_update() {
        let ctx = Context::new();
        ctx.set_tick_rate(4.0);
        ctx.register_system(Countdown::new(3)).unwrap();

        let mut heartbeat = Heartbeat::new(ctx.clone());
        let report = heartbeat.beat_with(Duration::from_millis(10));
        assert!(!report.update_due);
        assert_eq!(ctx.with_system(|countdown: &mut Countdown| countdown.remaining()).unwrap(), 3);
    }

    #[test]
    fn test_init_registers_countdown() {
        let ctx = Context::new();
        init(ctx.clone());
        assert!(ctx.has_system::<Countdown>());
        assert!(ctx.register_system(Countdown::new(1)).is_err());
    }
}
