use std::sync::Arc;

use async_trait::async_trait;
use remote_repl_core::EvaluatorHandle;
use remote_repl_transport::{CallError, OpTable, Registry, RemoteProxy, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvaluatorOp {
    Status,
}

static EVALUATOR_OPS: OpTable<EvaluatorOp> =
    OpTable::new("evaluator", &[("status", EvaluatorOp::Status)]);

/// Read-only view of the running evaluator, used by client health probes.
pub struct EvaluatorProxy {
    handle: Arc<dyn EvaluatorHandle>,
}

impl EvaluatorProxy {
    #[must_use]
    pub fn new(handle: Arc<dyn EvaluatorHandle>) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl RemoteProxy for EvaluatorProxy {
    fn kind(&self) -> &'static str {
        EVALUATOR_OPS.kind()
    }

    async fn invoke(
        &self,
        _registry: &Arc<Registry>,
        op: &str,
        _args: Vec<Value>,
    ) -> Result<Value, CallError> {
        match EVALUATOR_OPS.lookup(op)? {
            EvaluatorOp::Status => Ok(Value::Str(self.handle.status())),
        }
    }
}
