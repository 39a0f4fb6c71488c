//! OS signal and panic bridging.
//!
//! Both paths only ever raise the shutdown flag through a
//! [`ShutdownHandle`]; the heartbeat does the actual teardown. Signals are
//! received by a current-thread tokio runtime parked on a dedicated
//! `signal-bridge` thread, so no code runs in a raw signal handler.

use std::io;
use std::panic;
use std::sync::atomic::AtomicBool;
use std::sync::{Once, Weak};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::context::ShutdownHandle;

/// Owns the signal listener thread. Dropping the bridge stops the thread.
#[derive(Debug)]
pub struct SignalBridge {
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SignalBridge {
    /// Listen for interrupt and termination requests and raise `shutdown`
    /// when one arrives.
    ///
    /// # Errors
    ///
    /// Fails if the runtime, a signal stream or the listener thread cannot
    /// be created.
    pub fn install(shutdown: ShutdownHandle) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let signals = {
            let _guard = runtime.enter();
            Signals::new()?
        };
        let (stop, stopped) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name("signal-bridge".to_string())
            .spawn(move || listen(&runtime, signals, stopped, &shutdown))?;

        debug!("signal handlers installed");
        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("signal bridge thread panicked");
        }
    }
}

fn listen(
    runtime: &Runtime,
    mut signals: Signals,
    mut stopped: oneshot::Receiver<()>,
    shutdown: &ShutdownHandle,
) {
    loop {
        let received = runtime.block_on(async {
            tokio::select! {
                signal = signals.recv() => Some(signal),
                _ = &mut stopped => None,
            }
        });
        let Some(signal) = received else {
            debug!("signal bridge stopped");
            return;
        };
        info!(signal, "shutdown signal received");
        shutdown.request();
    }
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(windows)]
struct Signals {
    ctrl_c: tokio::signal::windows::CtrlC,
    ctrl_break: tokio::signal::windows::CtrlBreak,
    ctrl_close: tokio::signal::windows::CtrlClose,
    ctrl_shutdown: tokio::signal::windows::CtrlShutdown,
}

#[cfg(windows)]
impl Signals {
    fn new() -> io::Result<Self> {
        use tokio::signal::windows;

        Ok(Self {
            ctrl_c: windows::ctrl_c()?,
            ctrl_break: windows::ctrl_break()?,
            ctrl_close: windows::ctrl_close()?,
            ctrl_shutdown: windows::ctrl_shutdown()?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.ctrl_c.recv() => "CTRL_C",
            _ = self.ctrl_break.recv() => "CTRL_BREAK",
            _ = self.ctrl_close.recv() => "CTRL_CLOSE",
            _ = self.ctrl_shutdown.recv() => "CTRL_SHUTDOWN",
        }
    }
}

static PANIC_HOOK: Once = Once::new();

/// Shutdown flags raised by the panic hook. Dropped flags are pruned.
static PANIC_TARGETS: Mutex<Vec<Weak<AtomicBool>>> = Mutex::new(Vec::new());

/// Raise `shutdown` and log a diagnostic whenever a thread panics, then
/// defer to the previously installed hook.
///
/// The hook is installed once per process; later calls only add their flag.
/// Flags are held weakly.
pub fn install_panic_hook(shutdown: ShutdownHandle) {
    {
        let mut targets = PANIC_TARGETS.lock();
        targets.retain(|flag| flag.strong_count() > 0);
        targets.push(shutdown.downgrade());
    }
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            request_panic_shutdown();
            log_panic(info);
            previous(info);
        }));
    });
}

fn request_panic_shutdown() {
    let targets = PANIC_TARGETS.lock();
    for handle in targets.iter().filter_map(ShutdownHandle::upgrade) {
        handle.request();
    }
}

fn log_panic(info: &panic::PanicHookInfo<'_>) {
    let location = info.location().map_or_else(
        || "unknown".to_string(),
        |location| format!("{}:{}:{}", location.file(), location.line(), location.column()),
    );
    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string payload>");
    let thread = std::thread::current();
    error!(
        thread = thread.name().unwrap_or("<unnamed>"),
        location = %location,
        payload,
        "panic, shutting down"
    );
}
