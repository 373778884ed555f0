//! Wake-up channel for the parked client.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use remote_repl_transport::{CallError, OpTable, Registry, RemoteProxy, Value};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalOp {
    Resume,
    IsAbsent,
}

static SIGNAL_OPS: OpTable<SignalOp> = OpTable::new(
    "signal",
    &[("resume", SignalOp::Resume), ("is_absent", SignalOp::IsAbsent)],
);

/// Point where the client waits for the server to end the session.
#[derive(Debug, Clone, Default)]
pub struct ParkHandle {
    notify: Arc<Notify>,
}

impl ParkHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until resumed. A resume issued before parking is not lost.
    pub async fn park(&self) {
        self.notify.notified().await;
    }

    pub fn resume(&self) {
        self.notify.notify_one();
    }

    /// Proxy that can resume this handle for as long as it exists.
    #[must_use]
    pub fn proxy(&self) -> SignalProxy {
        SignalProxy {
            target: Arc::downgrade(&self.notify),
        }
    }
}

/// Signal proxy handed to the server.
///
/// Holds the park point weakly: once the client has moved on, the proxy
/// reports the target as absent and resuming it does nothing.
pub struct SignalProxy {
    target: Weak<Notify>,
}

#[async_trait]
impl RemoteProxy for SignalProxy {
    fn kind(&self) -> &'static str {
        SIGNAL_OPS.kind()
    }

    async fn invoke(
        &self,
        _registry: &Arc<Registry>,
        op: &str,
        _args: Vec<Value>,
    ) -> Result<Value, CallError> {
        match SIGNAL_OPS.lookup(op)? {
            SignalOp::Resume => match self.target.upgrade() {
                Some(notify) => {
                    notify.notify_one();
                    Ok(Value::Bool(true))
                }
                None => Ok(Value::Bool(false)),
            },
            SignalOp::IsAbsent => Ok(Value::Bool(self.target.strong_count() == 0)),
        }
    }
}
