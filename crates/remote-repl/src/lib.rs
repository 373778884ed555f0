//! Command-line client for remote REPL sessions.

pub mod cli;

pub use cli::{ClientArgs, CliBindProto};
