//! Boundary-crossing service: listener, object registry and dispatch.

use std::{
    collections::HashMap,
    io,
    path::PathBuf,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use remote_repl_core::ConnectionAddress;
use tokio::{
    sync::Mutex,
    task::{JoinHandle, JoinSet},
};

use crate::{
    error::{CallError, ServiceError},
    peer::PeerPool,
    protocol::{Frame, FrameReader, ObjectRef, Outcome, Value, write_frame},
    proxy::{Handle, RemoteProxy, RemoteRef},
    stream::{BoxedReader, BoxedWriter, Listener},
};

/// Registry id of a service's front object.
pub const FRONT_ID: u64 = 0;

/// Objects exported by one service, plus its outbound peers.
pub struct Registry {
    uri: ConnectionAddress,
    uri_string: String,
    objects: RwLock<HashMap<u64, Arc<dyn RemoteProxy>>>,
    next_id: AtomicU64,
    peers: Arc<PeerPool>,
}

impl Registry {
    /// Registry for a service reachable at `uri`, with `front` at id 0.
    #[must_use]
    pub fn new(uri: ConnectionAddress, front: Option<Arc<dyn RemoteProxy>>) -> Self {
        let mut objects = HashMap::new();
        if let Some(front) = front {
            objects.insert(FRONT_ID, front);
        }
        Self {
            uri_string: uri.to_string(),
            uri,
            objects: RwLock::new(objects),
            next_id: AtomicU64::new(FRONT_ID + 1),
            peers: Arc::new(PeerPool::new()),
        }
    }

    /// Address this service is reachable at.
    #[must_use]
    pub const fn uri(&self) -> &ConnectionAddress {
        &self.uri
    }

    /// Register `object` and return a reference the other side can use.
    pub fn export(&self, object: Arc<dyn RemoteProxy>) -> ObjectRef {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(id, object);
        }
        ObjectRef {
            uri: self.uri_string.clone(),
            id,
        }
    }

    /// Reference to `object`, reusing its id if it is already exported.
    pub fn export_once(&self, object: &Arc<dyn RemoteProxy>) -> ObjectRef {
        let existing = self.objects.read().ok().and_then(|objects| {
            objects
                .iter()
                .find(|(_, exported)| Arc::ptr_eq(exported, object))
                .map(|(id, _)| *id)
        });
        match existing {
            Some(id) => ObjectRef {
                uri: self.uri_string.clone(),
                id,
            },
            None => self.export(Arc::clone(object)),
        }
    }

    /// Turn a handle into a transmittable value.
    pub fn to_value(&self, handle: &Handle) -> Value {
        match handle {
            Handle::Local { object, .. } => Value::Ref(self.export_once(object)),
            Handle::Remote(remote) => Value::Ref(remote.target().clone()),
        }
    }

    /// Handle for a proxy living in this process.
    pub fn local(self: &Arc<Self>, object: Arc<dyn RemoteProxy>) -> Handle {
        Handle::Local {
            object,
            registry: Arc::downgrade(self),
        }
    }

    /// Resolve a reference: objects of this service become local handles,
    /// everything else a remote reference.
    ///
    /// # Errors
    /// Returns `NoSuchObject` for unknown local ids and `BadArguments` for
    /// unparseable addresses.
    pub fn resolve(self: &Arc<Self>, target: ObjectRef) -> Result<Handle, CallError> {
        if target.uri == self.uri_string {
            let object = self
                .lookup(target.id)
                .ok_or(CallError::NoSuchObject { id: target.id })?;
            return Ok(self.local(object));
        }

        let address: ConnectionAddress = target
            .uri
            .parse()
            .map_err(|e| CallError::bad_arguments("resolve", format!("{e}")))?;
        Ok(Handle::Remote(RemoteRef::new(
            target,
            address,
            Arc::clone(&self.peers),
        )))
    }

    /// Handle for the front object of the service at `address`.
    pub fn front(self: &Arc<Self>, address: &ConnectionAddress) -> Handle {
        Handle::Remote(RemoteRef::new(
            ObjectRef {
                uri: address.to_string(),
                id: FRONT_ID,
            },
            address.clone(),
            Arc::clone(&self.peers),
        ))
    }

    fn lookup(&self, id: u64) -> Option<Arc<dyn RemoteProxy>> {
        self.objects.read().ok()?.get(&id).cloned()
    }

    /// Number of exported objects, front object included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn dispatch(self: &Arc<Self>, target: u64, op: &str, args: Vec<Value>) -> Result<Value, CallError> {
        let object = self
            .lookup(target)
            .ok_or(CallError::NoSuchObject { id: target })?;
        let result = object.invoke(self, op, args).await;
        if let Err(e) = &result {
            tracing::debug!(kind = object.kind(), op, "Call failed: {e}");
        }
        result
    }

    fn clear(&self) {
        if let Ok(mut objects) = self.objects.write() {
            objects.clear();
        }
    }
}

/// A running boundary-crossing service.
pub struct Service {
    registry: Arc<Registry>,
    accept_task: Option<JoinHandle<()>>,
    socket_path: Option<PathBuf>,
}

impl Service {
    /// Bind to `address` and start serving, with `front` registered at id 0.
    ///
    /// # Errors
    /// Returns error if the address cannot be bound.
    pub async fn start(
        address: &ConnectionAddress,
        front: Option<Arc<dyn RemoteProxy>>,
    ) -> Result<Self, ServiceError> {
        let (listener, uri) = Listener::bind(address).await.map_err(|source| {
            if source.kind() == io::ErrorKind::Unsupported {
                ServiceError::UnixUnsupported
            } else {
                ServiceError::Bind {
                    address: address.clone(),
                    source,
                }
            }
        })?;

        let socket_path = listener.socket_path();
        let registry = Arc::new(Registry::new(uri, front));
        tracing::info!(uri = %registry.uri(), "Service started");

        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&registry)));

        Ok(Self {
            registry,
            accept_task: Some(accept_task),
            socket_path,
        })
    }

    /// Address the service is actually bound to.
    #[must_use]
    pub fn uri(&self) -> &ConnectionAddress {
        self.registry.uri()
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Export a local proxy.
    pub fn export(&self, object: Arc<dyn RemoteProxy>) -> Value {
        Value::Ref(self.registry.export(object))
    }

    /// Handle for the front object of the service at `address`.
    #[must_use]
    pub fn front(&self, address: &ConnectionAddress) -> Handle {
        self.registry.front(address)
    }

    /// Stop listening, drop all connections and forget every exported object.
    pub async fn stop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            let _ = task.await;
            self.registry.peers.close().await;
            self.registry.clear();
            self.remove_socket();
            tracing::info!(uri = %self.registry.uri(), "Service stopped");
        }
    }

    fn remove_socket(&mut self) {
        if let Some(path) = self.socket_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), "Failed to remove socket file: {e}");
            }
        }
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            self.registry.clear();
            self.remove_socket();
        }
    }
}

async fn accept_loop(listener: Listener, registry: Arc<Registry>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((reader, writer, peer)) => {
                    tracing::debug!(%peer, "Accepted connection");
                    connections.spawn(serve_connection(Arc::clone(&registry), reader, writer, peer));
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {e}");
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_connection(
    registry: Arc<Registry>,
    reader: BoxedReader,
    mut writer: BoxedWriter,
    peer: String,
) {
    let mut reader = FrameReader::new(reader);

    let expected = registry.uri().secret().map(str::to_string);
    match reader.read_frame().await {
        Ok(Some(Frame::Hello { secret })) => {
            if expected.is_some() && secret != expected {
                tracing::warn!(%peer, "Rejected connection with wrong secret");
                let rejected = Frame::Rejected {
                    reason: "invalid secret".to_string(),
                };
                let _ = write_frame(&mut writer, &rejected).await;
                return;
            }
        }
        Ok(other) => {
            tracing::warn!(%peer, ?other, "Expected hello frame");
            return;
        }
        Err(e) => {
            tracing::warn!(%peer, "Handshake failed: {e}");
            return;
        }
    }

    if let Err(e) = write_frame(&mut writer, &Frame::Welcome).await {
        tracing::debug!(%peer, "Failed to send welcome: {e}");
        return;
    }

    let writer = Arc::new(Mutex::new(writer));
    // Dropping the set aborts calls still running when the peer goes away.
    let mut calls = JoinSet::new();

    loop {
        tokio::select! {
            frame = reader.read_frame() => match frame {
                Ok(Some(Frame::Call { id, target, op, args })) => {
                    let registry = Arc::clone(&registry);
                    let writer = Arc::clone(&writer);
                    calls.spawn(async move {
                        tracing::trace!(id, target, op, "Serving call");
                        let result = registry.dispatch(target, &op, args).await;
                        let reply = Frame::Reply { id, result: Outcome::from(result) };
                        let mut writer = writer.lock().await;
                        if let Err(e) = write_frame(&mut *writer, &reply).await {
                            tracing::debug!(id, "Failed to send reply: {e}");
                        }
                    });
                }
                Ok(Some(other)) => {
                    tracing::warn!(%peer, ?other, "Ignoring unexpected frame");
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(%peer, "Connection read error: {e}");
                    break;
                }
            },
            Some(_) = calls.join_next(), if !calls.is_empty() => {}
        }
    }

    tracing::debug!(%peer, "Connection closed");
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::proxy::{Args, OpTable};

    #[derive(Clone, Copy)]
    enum CounterOp {
        Add,
        Get,
        Call,
        Slow,
    }

    static COUNTER_OPS: OpTable<CounterOp> = OpTable::new(
        "counter",
        &[
            ("add", CounterOp::Add),
            ("get", CounterOp::Get),
            ("call", CounterOp::Call),
            ("slow", CounterOp::Slow),
        ],
    );

    #[derive(Default)]
    struct Counter {
        value: std::sync::Mutex<i64>,
    }

    #[async_trait]
    impl RemoteProxy for Counter {
        fn kind(&self) -> &'static str {
            COUNTER_OPS.kind()
        }

        async fn invoke(
            &self,
            registry: &Arc<Registry>,
            op: &str,
            args: Vec<Value>,
        ) -> Result<Value, CallError> {
            let args = Args::new(op, args);
            match COUNTER_OPS.lookup(op)? {
                CounterOp::Add => {
                    let mut value = self.value.lock().unwrap();
                    *value += 1;
                    Ok(Value::Int(*value))
                }
                CounterOp::Get => Ok(Value::Int(*self.value.lock().unwrap())),
                CounterOp::Call => {
                    let target = args
                        .object(0)?
                        .ok_or_else(|| CallError::bad_arguments(op, "nil target"))?;
                    registry.resolve(target)?.invoke("add", vec![]).await
                }
                CounterOp::Slow => {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    Ok(Value::Nil)
                }
            }
        }
    }

    fn localhost() -> ConnectionAddress {
        ConnectionAddress::tcp("127.0.0.1", 0)
    }

    #[tokio::test]
    async fn test_remote_call_roundtrip() {
        let mut server = Service::start(&localhost(), Some(Arc::new(Counter::default())))
            .await
            .unwrap();
        let mut client = Service::start(&localhost(), None).await.unwrap();

        let front = client.front(server.uri());
        assert_eq!(front.invoke("add", vec![]).await.unwrap(), Value::Int(1));
        assert_eq!(front.invoke("add", vec![]).await.unwrap(), Value::Int(2));
        assert_eq!(front.invoke("get", vec![]).await.unwrap(), Value::Int(2));

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_disallowed_operation_is_rejected_remotely() {
        let mut server = Service::start(&localhost(), Some(Arc::new(Counter::default())))
            .await
            .unwrap();
        let mut client = Service::start(&localhost(), None).await.unwrap();

        let err = client
            .front(server.uri())
            .invoke("reset", vec![])
            .await
            .unwrap_err();
        assert!(err.is_not_permitted());

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_exported_object_is_called_back_in_its_owner() {
        let mut server = Service::start(&localhost(), Some(Arc::new(Counter::default())))
            .await
            .unwrap();
        let mut client = Service::start(&localhost(), None).await.unwrap();

        let local = Arc::new(Counter::default());
        let exported = client.export(Arc::clone(&local) as Arc<dyn RemoteProxy>);

        // The server resolves the reference and invokes it back in the client.
        let result = client
            .front(server.uri())
            .invoke("call", vec![exported])
            .await
            .unwrap();
        assert_eq!(result, Value::Int(1));
        assert_eq!(*local.value.lock().unwrap(), 1);

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_own_references_resolve_locally() {
        let mut service = Service::start(&localhost(), None).await.unwrap();
        let exported = service.registry().export(Arc::new(Counter::default()));

        let handle = service.registry().resolve(exported).unwrap();
        assert!(handle.is_local());
        assert_eq!(handle.invoke("add", vec![]).await.unwrap(), Value::Int(1));

        service.stop().await;
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_local_handle_is_exported_once() {
        let mut service = Service::start(&localhost(), None).await.unwrap();
        let registry = service.registry();
        let handle = registry.local(Arc::new(Counter::default()));

        let first = registry.to_value(&handle);
        for _ in 0..10 {
            assert_eq!(registry.to_value(&handle), first);
        }
        assert_eq!(registry.len(), 1);

        let other = registry.local(Arc::new(Counter::default()));
        assert_ne!(registry.to_value(&other), first);
        assert_eq!(registry.len(), 2);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_service_is_a_connection_error() {
        let mut probe = Service::start(&localhost(), None).await.unwrap();
        let port = probe.uri().socket_addr().unwrap();
        probe.stop().await;

        let mut client = Service::start(&localhost(), None).await.unwrap();
        let gone: ConnectionAddress = format!("tcp://{port}").parse().unwrap();
        let err = client.front(&gone).invoke("get", vec![]).await.unwrap_err();
        assert!(err.is_connection());

        client.stop().await;
    }

    #[tokio::test]
    async fn test_secret_mismatch_is_rejected() {
        let secured = localhost().with_secret(Some("right"));
        let mut server = Service::start(&secured, Some(Arc::new(Counter::default())))
            .await
            .unwrap();
        let mut client = Service::start(&localhost(), None).await.unwrap();

        let wrong = server.uri().clone().with_secret(Some("wrong"));
        let err = client.front(&wrong).invoke("get", vec![]).await.unwrap_err();
        assert!(err.is_connection());

        let right = server.uri().clone();
        assert_eq!(
            client.front(&right).invoke("get", vec![]).await.unwrap(),
            Value::Int(0)
        );

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_frame_split_around_a_finished_call_is_kept() {
        use tokio::io::AsyncWriteExt;

        use crate::stream;

        let mut server = Service::start(&localhost(), Some(Arc::new(Counter::default())))
            .await
            .unwrap();
        let (reader, mut writer) = stream::connect(server.uri()).await.unwrap();
        let mut reader = FrameReader::new(reader);

        write_frame(&mut writer, &Frame::Hello { secret: None })
            .await
            .unwrap();
        assert_eq!(reader.read_frame().await.unwrap(), Some(Frame::Welcome));

        let slow = Frame::Call {
            id: 1,
            target: FRONT_ID,
            op: "slow".to_string(),
            args: vec![],
        };
        write_frame(&mut writer, &slow).await.unwrap();

        let get = serde_json::to_string(&Frame::Call {
            id: 2,
            target: FRONT_ID,
            op: "get".to_string(),
            args: vec![],
        })
        .unwrap();
        let (head, tail) = get.split_at(get.len() / 2);
        writer.write_all(head.as_bytes()).await.unwrap();
        writer.flush().await.unwrap();
        // The slow call completes while the second frame is half received.
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        writer.write_all(tail.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        writer.flush().await.unwrap();

        let mut replies = Vec::new();
        for _ in 0..2 {
            match reader.read_frame().await.unwrap() {
                Some(Frame::Reply { id, result }) => replies.push((id, result)),
                other => panic!("Expected reply, got {other:?}"),
            }
        }
        replies.sort_by_key(|(id, _)| *id);
        assert_eq!(replies[0], (1, Outcome::Ok { value: Value::Nil }));
        assert_eq!(replies[1], (2, Outcome::Ok { value: Value::Int(0) }));

        server.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_socket_service() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repl.sock");
        let address = ConnectionAddress::unix(&path);

        let mut server = Service::start(&address, Some(Arc::new(Counter::default())))
            .await
            .unwrap();
        let mut client = Service::start(&localhost(), None).await.unwrap();

        assert_eq!(
            client.front(&address).invoke("add", vec![]).await.unwrap(),
            Value::Int(1)
        );

        client.stop().await;
        server.stop().await;
        assert!(!path.exists());
    }
}
