//! Shell command execution for remote sessions.
//!
//! Provides:
//! - `StreamingShell` - runs a command and streams its output into a sink
//! - Shell detection utilities for Unix and Windows

pub mod runner;
pub mod shell;

pub use runner::{CHUNK_SIZE, StreamingShell};
pub use shell::ShellCommand;
