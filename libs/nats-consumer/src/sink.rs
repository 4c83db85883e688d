//! Output surfaces for decoded messages.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::error;

use crate::error::SinkError;

/// Receives every successfully decoded message.
pub trait Sink: Send + Sync {
    fn emit(&self, stream: &str, value: &Value) -> Result<(), SinkError>;

    /// Flush and stop accepting writes. Later `emit` calls return
    /// [`SinkError::Closed`].
    fn close(&self);
}

/// Writes `[stream] #seq` followed by pretty JSON to a writer.
#[derive(Debug)]
pub struct ConsoleSink<W> {
    out: Mutex<W>,
    seq: AtomicU64,
    closed: AtomicBool,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of messages written so far.
    pub fn written(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> Sink for ConsoleSink<W> {
    fn emit(&self, stream: &str, value: &Value) -> Result<(), SinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        let pretty = serde_json::to_string_pretty(value)?;
        let mut out = self.out.lock();
        // seq is taken under the writer lock so output order matches numbering
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        writeln!(out, "[{stream}] #{seq}\n{pretty}")?;
        out.flush()?;
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Err(err) = self.out.lock().flush() {
                error!(error = %err, "sink failed to flush on close");
            }
        }
    }
}
