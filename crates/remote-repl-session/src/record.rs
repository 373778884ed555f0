//! The shared session record, published by the server as its front object.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use remote_repl_transport::{Args, CallError, Handle, OpTable, Registry, RemoteProxy, Value};

/// Interval at which a waiting server re-checks the record.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long teardown waits for the client to acknowledge `kill`.
pub const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Fields the client must supply before a session can start.
pub const REQUIRED: [Field; 3] = [Field::Input, Field::Output, Field::Thread];

/// A slot in the session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Input,
    Output,
    /// Signal channel used to wake the parked client.
    Thread,
    Stdout,
    Stderr,
    Evaluator,
}

impl Field {
    pub const ALL: [Self; 6] = [
        Self::Input,
        Self::Output,
        Self::Thread,
        Self::Stdout,
        Self::Stderr,
        Self::Evaluator,
    ];

    /// Name of the getter operation.
    #[must_use]
    pub const fn getter(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Thread => "thread",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Evaluator => "evaluator",
        }
    }

    /// Name of the setter operation.
    #[must_use]
    pub const fn setter(self) -> &'static str {
        match self {
            Self::Input => "set_input",
            Self::Output => "set_output",
            Self::Thread => "set_thread",
            Self::Stdout => "set_stdout",
            Self::Stderr => "set_stderr",
            Self::Evaluator => "set_evaluator",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.getter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOp {
    Wait,
    Kill,
    Get(Field),
    Set(Field),
}

static RECORD_OPS: OpTable<RecordOp> = OpTable::new(
    "session",
    &[
        ("wait", RecordOp::Wait),
        ("kill", RecordOp::Kill),
        ("input", RecordOp::Get(Field::Input)),
        ("set_input", RecordOp::Set(Field::Input)),
        ("output", RecordOp::Get(Field::Output)),
        ("set_output", RecordOp::Set(Field::Output)),
        ("thread", RecordOp::Get(Field::Thread)),
        ("set_thread", RecordOp::Set(Field::Thread)),
        ("stdout", RecordOp::Get(Field::Stdout)),
        ("set_stdout", RecordOp::Set(Field::Stdout)),
        ("stderr", RecordOp::Get(Field::Stderr)),
        ("set_stderr", RecordOp::Set(Field::Stderr)),
        ("evaluator", RecordOp::Get(Field::Evaluator)),
        ("set_evaluator", RecordOp::Set(Field::Evaluator)),
    ],
);

/// Rendezvous between server and client for one session.
///
/// Created empty by the server; the client fills in its endpoints and the
/// server starts the session once input, output and thread are all present.
#[derive(Default)]
pub struct SessionRecord {
    slots: RwLock<HashMap<Field, Handle>>,
}

impl SessionRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, field: Field) -> Option<Handle> {
        self.slots.read().ok()?.get(&field).cloned()
    }

    pub fn set(&self, field: Field, handle: Option<Handle>) {
        if let Ok(mut slots) = self.slots.write() {
            tracing::debug!(%field, present = handle.is_some(), "Record field stored");
            match handle {
                Some(handle) => slots.insert(field, handle),
                None => slots.remove(&field),
            };
        }
    }

    /// Whether the client has supplied everything a session needs.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.slots
            .read()
            .map(|s| REQUIRED.iter().all(|field| s.contains_key(field)))
            .unwrap_or(false)
    }

    /// Wait, without timeout, until the record is ready.
    pub async fn wait(&self) {
        while !self.is_ready() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wake the client through its signal channel.
    ///
    /// A record without a signal channel, or one whose target is gone, is
    /// not an error.
    ///
    /// # Errors
    /// Returns connection errors reaching the client, including no answer
    /// within [`KILL_TIMEOUT`].
    pub async fn kill(&self) -> Result<(), CallError> {
        self.kill_within(KILL_TIMEOUT).await
    }

    /// [`SessionRecord::kill`] with an explicit deadline.
    ///
    /// # Errors
    /// See [`SessionRecord::kill`].
    pub async fn kill_within(&self, limit: Duration) -> Result<(), CallError> {
        if let Some(thread) = self.get(Field::Thread) {
            let resumed = tokio::time::timeout(limit, thread.invoke("resume", vec![]))
                .await
                .map_err(|_| CallError::connection(format!("client did not answer within {limit:?}")))??;
            tracing::debug!(?resumed, "Signalled client");
        }
        Ok(())
    }

    /// Forget every field.
    pub fn clear(&self) {
        if let Ok(mut slots) = self.slots.write() {
            slots.clear();
        }
    }
}

#[async_trait]
impl RemoteProxy for SessionRecord {
    fn kind(&self) -> &'static str {
        RECORD_OPS.kind()
    }

    async fn invoke(
        &self,
        registry: &Arc<Registry>,
        op: &str,
        args: Vec<Value>,
    ) -> Result<Value, CallError> {
        match RECORD_OPS.lookup(op)? {
            RecordOp::Wait => {
                self.wait().await;
                Ok(Value::Nil)
            }
            RecordOp::Kill => {
                self.kill().await?;
                Ok(Value::Nil)
            }
            RecordOp::Get(field) => Ok(self
                .get(field)
                .map_or(Value::Nil, |handle| registry.to_value(&handle))),
            RecordOp::Set(field) => {
                let handle = Args::new(op, args)
                    .object(0)?
                    .map(|target| registry.resolve(target))
                    .transpose()?;
                self.set(field, handle);
                Ok(Value::Nil)
            }
        }
    }
}

/// Typed client-side access to a remote session record.
#[derive(Clone)]
pub struct RemoteRecord {
    handle: Handle,
    registry: Arc<Registry>,
}

impl RemoteRecord {
    /// `registry` is the local service's, used to resolve returned references.
    #[must_use]
    pub const fn new(handle: Handle, registry: Arc<Registry>) -> Self {
        Self { handle, registry }
    }

    /// Store `value`, an object reference or `nil`, into `field`.
    ///
    /// # Errors
    /// Returns connection errors or the record's refusal.
    pub async fn store(&self, field: Field, value: Value) -> Result<(), CallError> {
        self.handle.invoke(field.setter(), vec![value]).await?;
        Ok(())
    }

    /// Current content of `field`.
    ///
    /// # Errors
    /// Returns connection errors, or `BadArguments` for a non-reference.
    pub async fn fetch(&self, field: Field) -> Result<Option<Handle>, CallError> {
        match self.handle.invoke(field.getter(), vec![]).await? {
            Value::Nil => Ok(None),
            Value::Ref(target) => self.registry.resolve(target).map(Some),
            other => Err(CallError::bad_arguments(
                field.getter(),
                format!("expected an object reference, got {other:?}"),
            )),
        }
    }

    /// Ask the server to wake the client.
    ///
    /// # Errors
    /// Returns connection errors.
    pub async fn kill(&self) -> Result<(), CallError> {
        self.handle.invoke("kill", vec![]).await?;
        Ok(())
    }
}
