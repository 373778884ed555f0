//! Server and client bridges for remote REPL sessions.
//!
//! Provides:
//! - `remote_repl` / `Server` - publish an evaluator and serve one client
//! - `Client` - lend the local terminal to a remote evaluator
//! - `SessionRecord` - the rendezvous both sides meet at
//! - Allow-listed proxies for input, output, capture and signalling
//! - `capture` - process-wide default sinks that follow the session

pub mod capture;
pub mod client;
pub mod proxies;
pub mod record;
pub mod server;
pub mod status;
pub mod terminal;

pub use capture::{CaptureError, CaptureGuard};
pub use client::{BindProto, Client, ClientError, ClientOptions, ClientState, RETRY_INTERVAL, Terminal};
pub use record::{Field, KILL_TIMEOUT, POLL_INTERVAL, RemoteRecord, SessionRecord};
pub use server::{Server, ServerError, ServerOptions, ServerState, remote_repl};
pub use terminal::{TerminalInput, default_history_path};
