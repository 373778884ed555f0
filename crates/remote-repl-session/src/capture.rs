//! Process-wide default output and error sinks.
//!
//! Code in the server process that wants its console output to follow the
//! remote session writes through [`stdout`] and [`stderr`] instead of the raw
//! console. While a session holds a [`CaptureGuard`], the evaluation hooks
//! point these at the client's capture proxies for the duration of each
//! evaluation.

use std::{
    io,
    sync::{
        Arc, LazyLock, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use remote_repl_core::{Hooks, OutputSink, SharedWriter};
use thiserror::Error;

#[derive(Clone)]
struct Sinks {
    stdout: Arc<dyn OutputSink>,
    stderr: Arc<dyn OutputSink>,
}

static CONSOLE: LazyLock<Sinks> = LazyLock::new(|| Sinks {
    stdout: Arc::new(SharedWriter::stdout()),
    stderr: Arc::new(SharedWriter::stderr()),
});

static CURRENT: LazyLock<RwLock<Sinks>> = LazyLock::new(|| RwLock::new(CONSOLE.clone()));

static ACQUIRED: AtomicBool = AtomicBool::new(false);

/// Current default output sink.
#[must_use]
pub fn stdout() -> Arc<dyn OutputSink> {
    current().stdout
}

/// Current default error sink.
#[must_use]
pub fn stderr() -> Arc<dyn OutputSink> {
    current().stderr
}

/// Write `line` to the current default output sink.
///
/// # Errors
/// Returns the sink's I/O error.
pub async fn puts(line: &str) -> io::Result<()> {
    stdout().write_line(line).await
}

/// Write `line` to the current default error sink.
///
/// # Errors
/// Returns the sink's I/O error.
pub async fn eputs(line: &str) -> io::Result<()> {
    stderr().write_line(line).await
}

fn current() -> Sinks {
    CURRENT
        .read()
        .map_or_else(|poisoned| poisoned.into_inner().clone(), |s| s.clone())
}

fn replace(sinks: &Sinks) {
    match CURRENT.write() {
        Ok(mut current) => *current = sinks.clone(),
        Err(poisoned) => *poisoned.into_inner() = sinks.clone(),
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Capture state is already held by another session")]
    AlreadyAcquired,
}

struct Window {
    previous: Sinks,
    session: Sinks,
    released: AtomicBool,
}

impl Window {
    fn capture(&self) {
        if !self.released.load(Ordering::SeqCst) {
            replace(&self.session);
        }
    }

    fn uncapture(&self) {
        if !self.released.load(Ordering::SeqCst) {
            replace(&self.previous);
        }
    }
}

/// Exclusive, scoped ownership of the process-wide sinks.
///
/// Dropping the guard restores the sinks that were current when it was
/// acquired. Hooks installed from the guard do nothing after that.
pub struct CaptureGuard {
    window: Arc<Window>,
}

impl CaptureGuard {
    /// Take the capture state for a session writing to `stdout`/`stderr`.
    ///
    /// # Errors
    /// Returns `AlreadyAcquired` while another guard is alive.
    pub fn acquire(
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> Result<Self, CaptureError> {
        if ACQUIRED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CaptureError::AlreadyAcquired);
        }
        Ok(Self {
            window: Arc::new(Window {
                previous: current(),
                session: Sinks { stdout, stderr },
                released: AtomicBool::new(false),
            }),
        })
    }

    /// Point the process sinks at the session.
    pub fn capture(&self) {
        self.window.capture();
    }

    /// Point the process sinks back at what they were before the session.
    pub fn uncapture(&self) {
        self.window.uncapture();
    }

    /// Register capture before and uncapture after every evaluation.
    pub fn install(&self, hooks: &mut Hooks) {
        let before = Arc::clone(&self.window);
        let after = Arc::clone(&self.window);
        hooks
            .before_eval("remote_repl_capture", move || before.capture())
            .after_eval("remote_repl_uncapture", move || after.uncapture());
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.window.uncapture();
        self.window.released.store(true, Ordering::SeqCst);
        ACQUIRED.store(false, Ordering::SeqCst);
    }
}
