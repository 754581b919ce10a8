//! User-facing request log written when `--verbose` is on.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared destination for verbose request lines. Clones write to the same
/// writer; each line is written under the lock so concurrent calls never
/// interleave within a line.
#[derive(Clone)]
pub struct VerboseLog {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl VerboseLog {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    pub(crate) fn line(&self, args: fmt::Arguments<'_>) {
        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Logging must never fail the request.
        let _ = writeln!(writer, "{args}");
        let _ = writer.flush();
    }
}

impl fmt::Debug for VerboseLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerboseLog").finish_non_exhaustive()
    }
}

/// Rounds to millisecond precision for display.
pub(crate) fn round_millis(elapsed: Duration) -> Duration {
    Duration::from_millis(((elapsed.as_micros() + 500) / 1000) as u64)
}
