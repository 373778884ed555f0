//! Boundary-crossing transport for remote REPL sessions.
//!
//! Provides:
//! - Wire protocol (newline-delimited JSON + base64)
//! - `RemoteProxy` - allow-listed objects invocable from another process
//! - `Service` - per-process listener, object registry and peer pool

pub mod error;
pub mod peer;
pub mod protocol;
pub mod proxy;
pub mod service;
pub mod stream;

pub use error::{CallError, ServiceError};
pub use protocol::{ObjectRef, Value};
pub use proxy::{Args, Handle, OpTable, RemoteProxy, RemoteRef};
pub use service::{FRONT_ID, Registry, Service};
