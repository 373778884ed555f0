//! Outbound connections to other services.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use remote_repl_core::ConnectionAddress;
use tokio::{
    sync::{Mutex, oneshot},
    task::JoinHandle,
};

use crate::{
    error::CallError,
    protocol::{Frame, FrameReader, Value, write_frame},
    stream::{self, BoxedWriter},
};

type Pending = Arc<std::sync::Mutex<HashMap<u64, oneshot::Sender<Result<Value, CallError>>>>>;

/// A connection to one remote service.
///
/// Calls are multiplexed: several may be in flight at once and replies are
/// matched by id in a background reader task.
pub struct Peer {
    address: ConnectionAddress,
    writer: Mutex<BoxedWriter>,
    pending: Pending,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Peer {
    /// Connect and complete the handshake.
    ///
    /// # Errors
    /// Returns a connection error if the service is unreachable or rejects
    /// the handshake.
    pub async fn connect(address: &ConnectionAddress) -> Result<Self, CallError> {
        let (reader, mut writer) = stream::connect(address)
            .await
            .map_err(|e| CallError::connection(format!("{address}: {e}")))?;
        let mut reader = FrameReader::new(reader);

        let hello = Frame::Hello {
            secret: address.secret().map(str::to_string),
        };
        write_frame(&mut writer, &hello)
            .await
            .map_err(CallError::connection)?;

        match reader.read_frame().await.map_err(CallError::connection)? {
            Some(Frame::Welcome) => {}
            Some(Frame::Rejected { reason }) => {
                return Err(CallError::connection(format!("handshake rejected: {reason}")));
            }
            Some(other) => {
                return Err(CallError::connection(format!(
                    "unexpected handshake frame: {other:?}"
                )));
            }
            None => return Err(CallError::connection("connection closed during handshake")),
        }

        tracing::debug!(%address, "Connected to peer");

        let pending: Pending = Arc::default();
        let alive = Arc::new(AtomicBool::new(true));

        let reader = {
            let pending = Arc::clone(&pending);
            let alive = Arc::clone(&alive);
            let address = address.clone();
            tokio::spawn(async move {
                loop {
                    match reader.read_frame().await {
                        Ok(Some(Frame::Reply { id, result })) => {
                            let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
                            if let Some(tx) = waiter {
                                let _ = tx.send(result.into());
                            }
                        }
                        Ok(Some(other)) => {
                            tracing::warn!(%address, ?other, "Ignoring unexpected frame from peer");
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::debug!(%address, "Peer read error: {e}");
                            break;
                        }
                    }
                }

                alive.store(false, Ordering::SeqCst);
                let drained: Vec<_> = pending
                    .lock()
                    .map(|mut p| p.drain().map(|(_, tx)| tx).collect())
                    .unwrap_or_default();
                for tx in drained {
                    let _ = tx.send(Err(CallError::connection("connection closed")));
                }
                tracing::debug!(%address, "Peer disconnected");
            })
        };

        Ok(Self {
            address: address.clone(),
            writer: Mutex::new(writer),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            reader,
        })
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    #[must_use]
    pub const fn address(&self) -> &ConnectionAddress {
        &self.address
    }

    /// Invoke `op` on object `target` and wait for the reply.
    ///
    /// # Errors
    /// Returns the remote error, or a connection error if the link drops.
    pub async fn call(&self, target: u64, op: &str, args: Vec<Value>) -> Result<Value, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|e| CallError::connection(e.to_string()))?
            .insert(id, tx);

        // Checked after registering so a concurrent disconnect cannot strand us.
        if !self.is_alive() {
            self.forget(id);
            return Err(CallError::connection("connection closed"));
        }

        let frame = Frame::Call {
            id,
            target,
            op: op.to_string(),
            args,
        };
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_frame(&mut *writer, &frame).await {
                self.alive.store(false, Ordering::SeqCst);
                self.forget(id);
                return Err(CallError::connection(e));
            }
        }

        tracing::trace!(address = %self.address, id, target, op, "Call sent");

        rx.await
            .unwrap_or_else(|_| Err(CallError::connection("connection closed")))
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Outbound peers, one per remote service address.
#[derive(Default)]
pub struct PeerPool {
    peers: Mutex<HashMap<String, Arc<Peer>>>,
    closed: AtomicBool,
}

impl PeerPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live peer for `address`, dialling a new one if needed.
    ///
    /// # Errors
    /// Returns a connection error if the pool is closed or dialling fails.
    pub async fn get(&self, address: &ConnectionAddress) -> Result<Arc<Peer>, CallError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CallError::connection("service stopped"));
        }

        let key = address.to_string();
        let mut peers = self.peers.lock().await;
        if let Some(peer) = peers.get(&key) {
            if peer.is_alive() {
                return Ok(Arc::clone(peer));
            }
        }

        let peer = Arc::new(Peer::connect(address).await?);
        peers.insert(key, Arc::clone(&peer));
        Ok(peer)
    }

    /// Drop every peer and refuse new ones.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.peers.lock().await.clear();
    }
}
