//! Collaborator traits the bridge is written against.
//!
//! The interactive evaluator, the line editor and the shell runner all live
//! outside the bridge. These traits are the only surface the bridge uses.

use std::{io, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::{EvalConfig, Hooks};

/// A byte sink such as a console stream or a remote output proxy.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Write all of `data`.
    async fn write(&self, data: &[u8]) -> io::Result<()>;

    /// Flush buffered output.
    async fn flush(&self) -> io::Result<()>;

    /// Write `line`, adding a trailing newline unless it already has one.
    async fn write_line(&self, line: &str) -> io::Result<()> {
        if line.ends_with('\n') {
            self.write(line.as_bytes()).await
        } else {
            let mut buf = String::with_capacity(line.len() + 1);
            buf.push_str(line);
            buf.push('\n');
            self.write(buf.as_bytes()).await
        }
    }

    /// Whether the sink is attached to a terminal.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Whether the sink has been closed by its reader.
    fn is_eof(&self) -> bool {
        false
    }
}

/// Interactive line input.
#[async_trait]
pub trait LineSource: Send + Sync {
    /// Whether `read_line` renders the prompt itself.
    ///
    /// Sources that return `false` are called with `None` and the caller is
    /// responsible for printing the prompt.
    fn accepts_prompt(&self) -> bool {
        true
    }

    /// Read one line. `Ok(None)` signals end of input.
    async fn read_line(&self, prompt: Option<&str>) -> io::Result<Option<String>>;

    /// Install a completion callback. Returns `false` if the source has no
    /// completion support.
    async fn set_completer(&self, _completer: Arc<dyn Completer>) -> io::Result<bool> {
        Ok(false)
    }
}

/// Tab-completion callback.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, line: &str) -> Vec<String>;
}

/// Handle describing a running evaluator.
pub trait EvaluatorHandle: Send + Sync {
    /// Short human-readable status.
    fn status(&self) -> String;
}

/// Runs shell commands on behalf of the evaluator.
///
/// Implementations must never fail: problems are reported as lines written
/// to `output`.
#[async_trait]
pub trait SystemHandler: Send + Sync {
    async fn run(&self, output: &dyn OutputSink, command: &str);
}

/// Everything an evaluator needs for one session.
pub struct SessionIo {
    /// Where expressions are read from.
    pub input: Arc<dyn LineSource>,
    /// Where results are written to.
    pub output: Arc<dyn OutputSink>,
    /// Lifecycle hooks to fire during the session.
    pub hooks: Hooks,
}

/// Evaluator error.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Evaluator failed: {0}")]
    Failed(String),
}

/// Interactive evaluator bound to the object it exposes.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Run one interactive session until the user ends it.
    async fn start(&self, io: SessionIo) -> Result<(), EvalError>;

    /// Replace the evaluator-wide configuration, returning the previous one.
    fn swap_config(&self, config: EvalConfig) -> EvalConfig;
}
