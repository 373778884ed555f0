//! Transport errors.

use std::io;

use remote_repl_core::ConnectionAddress;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single invocation on a proxy.
///
/// Serializable so that errors raised in the owning process reach the caller
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum CallError {
    /// The owning process could not be reached or the link dropped mid-call.
    #[error("Connection error: {reason}")]
    Connection { reason: String },
    /// The operation is not on the proxy's allow-list.
    #[error("Operation `{op}` on {kind} proxy is not permitted across this boundary")]
    NotPermitted { kind: String, op: String },
    #[error("No such object: {id}")]
    NoSuchObject { id: u64 },
    #[error("Bad arguments for `{op}`: {reason}")]
    BadArguments { op: String, reason: String },
    /// The delegate ran and failed.
    #[error("{message}")]
    Failed { message: String },
}

impl CallError {
    pub fn connection(reason: impl std::fmt::Display) -> Self {
        Self::Connection {
            reason: reason.to_string(),
        }
    }

    pub fn bad_arguments(op: &str, reason: impl Into<String>) -> Self {
        Self::BadArguments {
            op: op.to_string(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    #[must_use]
    pub const fn is_not_permitted(&self) -> bool {
        matches!(self, Self::NotPermitted { .. })
    }
}

impl From<io::Error> for CallError {
    fn from(e: io::Error) -> Self {
        Self::Failed {
            message: e.to_string(),
        }
    }
}

impl From<CallError> for io::Error {
    fn from(e: CallError) -> Self {
        let kind = match &e {
            CallError::Connection { .. } => io::ErrorKind::ConnectionAborted,
            CallError::NotPermitted { .. } => io::ErrorKind::PermissionDenied,
            CallError::BadArguments { .. } => io::ErrorKind::InvalidInput,
            CallError::NoSuchObject { .. } => io::ErrorKind::NotFound,
            CallError::Failed { .. } => io::ErrorKind::Other,
        };
        Self::new(kind, e)
    }
}

/// Service lifecycle error.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: ConnectionAddress,
        #[source]
        source: io::Error,
    },
    #[error("Unix domain sockets are not supported on this platform")]
    UnixUnsupported,
}
