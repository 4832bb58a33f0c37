//! User-facing event timeline.
//!
//! One `[HH:MM:SS.mmm] <session> <message>` line per lifecycle event. This
//! is program output, separate from `tracing` diagnostics on stderr.
//!
//! Lines are formatted first and then written and flushed in place on the
//! calling task, with the sink lock held for that single write only. Lines
//! from concurrent sessions therefore never interleave.

use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::Local;

type Sink = Box<dyn Write + Send>;

/// Cloneable line writer shared by all sessions of a run.
#[derive(Clone)]
pub struct Timeline {
    sink: Arc<Mutex<Sink>>,
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline").finish_non_exhaustive()
    }
}

impl Timeline {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Discard every line.
    pub fn silent() -> Self {
        Self::new(io::sink())
    }

    /// Timeline writing into memory, plus a handle to read it back.
    pub fn buffered() -> (Self, TimelineBuffer) {
        let buffer = TimelineBuffer::default();
        (Self::new(buffer.clone()), buffer)
    }

    fn sink(&self) -> MutexGuard<'_, Sink> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one event for `session`.
    pub fn event(&self, session: &str, message: impl fmt::Display) {
        let stamp = Local::now().format("%H:%M:%S%.3f");
        tracing::debug!(session, %message, "timeline");
        let line = format!("[{stamp}] {session} {message}\n");

        let mut sink = self.sink();
        let written = sink.write_all(line.as_bytes()).and_then(|()| sink.flush());
        drop(sink);
        if let Err(e) = written {
            tracing::warn!(error = %e, "failed to write timeline line");
        }
    }
}

/// In-memory sink for [`Timeline::buffered`].
#[derive(Debug, Clone, Default)]
pub struct TimelineBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl TimelineBuffer {
    /// Every line written so far.
    pub fn lines(&self) -> Vec<String> {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for TimelineBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
