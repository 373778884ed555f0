//! Core types for remote REPL sessions.
//!
//! This crate provides the pieces both sides of the bridge agree on:
//! - `ConnectionAddress` - Where a server publishes and a client connects
//! - Collaborator traits (`Evaluator`, `LineSource`, `OutputSink`, ...)
//! - `Hooks` - Evaluator lifecycle hooks
//! - `SharedWriter` - Console sinks

pub mod address;
pub mod config;
pub mod hooks;
pub mod sink;
pub mod traits;

pub use address::{AddressError, ConnectionAddress, DEFAULT_HOST, DEFAULT_PORT, Transport};
pub use config::EvalConfig;
pub use hooks::{HookEvent, Hooks};
pub use sink::SharedWriter;
pub use traits::{
    Completer, EvalError, Evaluator, EvaluatorHandle, LineSource, OutputSink, SessionIo,
    SystemHandler,
};
