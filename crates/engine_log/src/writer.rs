//! Async line writer.
//!
//! Formatted lines are pushed into a bounded queue and written by a pool of
//! worker threads. When the queue is full the producer blocks until there is
//! room, unless it runs inside an async runtime, in which case the line is
//! dropped and counted.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing_subscriber::fmt::MakeWriter;

use crate::error::LogError;

/// Destination of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Console,
    File,
}

enum Message {
    Line { target: Target, bytes: Vec<u8> },
    Stop,
}

type Output = Mutex<Box<dyn Write + Send>>;

/// The outputs lines are written to.
pub struct Sinks {
    console: Output,
    file: Option<Output>,
}

impl Sinks {
    #[must_use]
    pub fn new(console: impl Write + Send + 'static, file: Option<Box<dyn Write + Send>>) -> Self {
        Self {
            console: Mutex::new(Box::new(console)),
            file: file.map(Mutex::new),
        }
    }

    fn write(&self, target: Target, bytes: &[u8]) {
        let output = match target {
            Target::Console => Some(&self.console),
            Target::File => self.file.as_ref(),
        };
        if let Some(output) = output {
            let mut output = output.lock();
            if let Err(err) = output.write_all(bytes) {
                eprintln!("[Error] log write failed: {err}");
            }
        }
    }

    fn flush(&self) {
        let _ = self.console.lock().flush();
        if let Some(file) = &self.file {
            let _ = file.lock().flush();
        }
    }
}

/// Owns the worker threads. Dropping the guard writes every queued line and
/// stops the workers.
pub struct AsyncGuard {
    sender: Sender<Message>,
    workers: Vec<JoinHandle<()>>,
    sinks: Arc<Sinks>,
    dropped: Arc<AtomicU64>,
}

impl AsyncGuard {
    /// Number of lines dropped because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for AsyncGuard {
    fn drop(&mut self) {
        let inside_runtime = tokio::runtime::Handle::try_current().is_ok();
        let mut stopped = true;
        for _ in &self.workers {
            let sent = if inside_runtime {
                self.sender.try_send(Message::Stop).is_ok()
            } else {
                self.sender.blocking_send(Message::Stop).is_ok()
            };
            stopped &= sent;
        }
        // A worker that never received `Stop` would block the join forever.
        if stopped {
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
        }
        self.sinks.flush();

        let dropped = self.dropped();
        if dropped > 0 {
            eprintln!("[Warn ] {dropped} log lines dropped, async queue was full");
        }
    }
}

/// Start `threads` workers fed by a queue of `buffer` lines.
///
/// # Errors
///
/// Fails if a worker thread cannot be spawned.
pub fn spawn(
    sinks: Sinks,
    buffer: usize,
    threads: usize,
) -> Result<(AsyncWriter, AsyncGuard), LogError> {
    let (sender, receiver) = mpsc::channel(buffer.max(1));
    let receiver = Arc::new(Mutex::new(receiver));
    let sinks = Arc::new(sinks);
    let dropped = Arc::new(AtomicU64::new(0));

    let mut workers = Vec::with_capacity(threads);
    for index in 0..threads.max(1) {
        let receiver = Arc::clone(&receiver);
        let sinks = Arc::clone(&sinks);
        let worker = std::thread::Builder::new()
            .name(format!("log-writer-{index}"))
            .spawn(move || work(&receiver, &sinks))
            .map_err(LogError::Worker)?;
        workers.push(worker);
    }

    let writer = AsyncWriter {
        sender: sender.clone(),
        dropped: Arc::clone(&dropped),
    };
    let guard = AsyncGuard {
        sender,
        workers,
        sinks,
        dropped,
    };
    Ok((writer, guard))
}

fn work(receiver: &Mutex<Receiver<Message>>, sinks: &Sinks) {
    loop {
        let message = receiver.lock().blocking_recv();
        match message {
            Some(Message::Line { target, bytes }) => sinks.write(target, &bytes),
            Some(Message::Stop) | None => return,
        }
    }
}

/// Queues formatted lines for the worker pool.
#[derive(Clone)]
pub struct AsyncWriter {
    sender: Sender<Message>,
    dropped: Arc<AtomicU64>,
}

impl AsyncWriter {
    /// A [`MakeWriter`] sending lines to `target`.
    #[must_use]
    pub fn to(&self, target: Target) -> AsyncMakeWriter {
        AsyncMakeWriter {
            writer: self.clone(),
            target,
        }
    }

    fn send(&self, target: Target, bytes: Vec<u8>) {
        let message = Message::Line { target, bytes };
        match self.sender.try_send(message) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(message)) => {
                if tokio::runtime::Handle::try_current().is_ok()
                    || self.sender.blocking_send(message).is_err()
                {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Produces one [`LineWriter`] per event.
#[derive(Clone)]
pub struct AsyncMakeWriter {
    writer: AsyncWriter,
    target: Target,
}

impl<'a> MakeWriter<'a> for AsyncMakeWriter {
    type Writer = LineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LineWriter {
            writer: self.writer.clone(),
            target: self.target,
            buffer: Vec::new(),
        }
    }
}

/// Buffers one formatted event and queues it when dropped.
pub struct LineWriter {
    writer: AsyncWriter,
    target: Target,
    buffer: Vec<u8>,
}

impl Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            self.writer
                .send(self.target, std::mem::take(&mut self.buffer));
        }
    }
}
