//! Capability-restricted objects that may be invoked across the boundary.

use std::{
    fmt,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use remote_repl_core::ConnectionAddress;

use crate::{
    error::CallError,
    peer::PeerPool,
    protocol::{ObjectRef, Value},
    service::Registry,
};

/// An object that stays in its owning process.
///
/// The only thing the other side can do with it is name an operation; the
/// proxy decides, by table lookup, whether that operation exists.
#[async_trait]
pub trait RemoteProxy: Send + Sync + 'static {
    /// Proxy kind, reported in permission errors.
    fn kind(&self) -> &'static str;

    /// Run `op` in this process.
    ///
    /// `registry` is the owning service's registry, used to turn object
    /// references in `args` into handles and to export results.
    async fn invoke(
        &self,
        registry: &Arc<Registry>,
        op: &str,
        args: Vec<Value>,
    ) -> Result<Value, CallError>;
}

/// Static allow-list mapping operation names to a proxy's operation enum.
pub struct OpTable<Op: 'static> {
    kind: &'static str,
    ops: &'static [(&'static str, Op)],
}

impl<Op: Copy> OpTable<Op> {
    #[must_use]
    pub const fn new(kind: &'static str, ops: &'static [(&'static str, Op)]) -> Self {
        Self { kind, ops }
    }

    /// Resolve `name`, failing closed for anything not listed.
    ///
    /// # Errors
    /// Returns `CallError::NotPermitted` for operations outside the table.
    pub fn lookup(&self, name: &str) -> Result<Op, CallError> {
        self.ops
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, op)| *op)
            .ok_or_else(|| CallError::NotPermitted {
                kind: self.kind.to_string(),
                op: name.to_string(),
            })
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    /// Allowed operation names.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ops.iter().map(|(n, _)| *n)
    }
}

/// Positional call arguments with typed accessors.
pub struct Args<'a> {
    op: &'a str,
    values: Vec<Value>,
}

impl<'a> Args<'a> {
    #[must_use]
    pub const fn new(op: &'a str, values: Vec<Value>) -> Self {
        Self { op, values }
    }

    fn get(&self, index: usize) -> Result<&Value, CallError> {
        self.values
            .get(index)
            .ok_or_else(|| CallError::bad_arguments(self.op, format!("missing argument {index}")))
    }

    /// Argument `index` as bytes (strings are accepted too).
    ///
    /// # Errors
    /// Returns `BadArguments` if missing or of the wrong type.
    pub fn bytes(&self, index: usize) -> Result<&[u8], CallError> {
        self.get(index)?
            .as_bytes()
            .ok_or_else(|| CallError::bad_arguments(self.op, format!("argument {index} is not bytes")))
    }

    /// Argument `index` as a string.
    ///
    /// # Errors
    /// Returns `BadArguments` if missing or of the wrong type.
    pub fn string(&self, index: usize) -> Result<&str, CallError> {
        self.get(index)?
            .as_str()
            .ok_or_else(|| CallError::bad_arguments(self.op, format!("argument {index} is not a string")))
    }

    /// Argument `index` as an optional string; missing and `nil` are `None`.
    ///
    /// # Errors
    /// Returns `BadArguments` if present and not a string.
    pub fn optional_string(&self, index: usize) -> Result<Option<&str>, CallError> {
        match self.values.get(index) {
            None | Some(Value::Nil) => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(_) => Err(CallError::bad_arguments(
                self.op,
                format!("argument {index} is not a string"),
            )),
        }
    }

    /// Argument `index` as an optional object reference; `nil` is `None`.
    ///
    /// # Errors
    /// Returns `BadArguments` if missing or neither `nil` nor a reference.
    pub fn object(&self, index: usize) -> Result<Option<ObjectRef>, CallError> {
        match self.get(index)? {
            Value::Nil => Ok(None),
            Value::Ref(r) => Ok(Some(r.clone())),
            _ => Err(CallError::bad_arguments(
                self.op,
                format!("argument {index} is not an object reference"),
            )),
        }
    }
}

/// Something operations can be invoked on: a proxy in this process or a
/// reference to one in another process.
#[derive(Clone)]
pub enum Handle {
    Local {
        object: Arc<dyn RemoteProxy>,
        registry: Weak<Registry>,
    },
    Remote(RemoteRef),
}

impl Handle {
    /// Invoke `op` wherever the object lives.
    ///
    /// # Errors
    /// Returns the proxy's error, or a connection error for unreachable objects.
    pub async fn invoke(&self, op: &str, args: Vec<Value>) -> Result<Value, CallError> {
        match self {
            Self::Local { object, registry } => {
                let registry = registry
                    .upgrade()
                    .ok_or_else(|| CallError::connection("service stopped"))?;
                object.invoke(&registry, op, args).await
            }
            Self::Remote(remote) => remote.invoke(op, args).await,
        }
    }

    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { object, .. } => write!(f, "Handle::Local({})", object.kind()),
            Self::Remote(remote) => write!(f, "Handle::Remote({:?})", remote.target),
        }
    }
}

/// Reference to an object owned by another service.
#[derive(Clone)]
pub struct RemoteRef {
    target: ObjectRef,
    address: ConnectionAddress,
    peers: Arc<PeerPool>,
}

impl RemoteRef {
    pub(crate) const fn new(target: ObjectRef, address: ConnectionAddress, peers: Arc<PeerPool>) -> Self {
        Self {
            target,
            address,
            peers,
        }
    }

    #[must_use]
    pub const fn target(&self) -> &ObjectRef {
        &self.target
    }

    /// Invoke `op` in the owning process.
    ///
    /// # Errors
    /// Returns the remote error or a connection error.
    pub async fn invoke(&self, op: &str, args: Vec<Value>) -> Result<Value, CallError> {
        let peer = self.peers.get(&self.address).await?;
        peer.call(self.target.id, op, args).await
    }
}
