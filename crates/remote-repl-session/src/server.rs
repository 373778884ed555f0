//! Server side of the bridge: publishes a session record and runs the
//! evaluator against whatever endpoints a client stores into it.

use std::{path::PathBuf, sync::Arc};

use remote_repl_core::{
    ConnectionAddress, DEFAULT_HOST, DEFAULT_PORT, EvalConfig, EvalError, Evaluator,
    EvaluatorHandle, Hooks, SessionIo, SharedWriter,
};
use remote_repl_shell::StreamingShell;
use remote_repl_transport::{CallError, Handle, RemoteProxy, Service, ServiceError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    capture::{CaptureError, CaptureGuard},
    proxies::{EvaluatorProxy, OutputProxy, RemoteInput, RemoteSink},
    record::{Field, SessionRecord},
    status,
};

/// Where and how the server publishes its session record.
///
/// Every field is optional; unset fields fall back to `127.0.0.1:9876`
/// without a secret. `unix` takes precedence over `host`/`port`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub unix: Option<PathBuf>,
    pub secret: Option<String>,
}

impl ServerOptions {
    /// Address to publish at.
    #[must_use]
    pub fn address(&self) -> ConnectionAddress {
        let address = match &self.unix {
            Some(path) => ConnectionAddress::unix(path),
            None => ConnectionAddress::tcp(
                self.host.as_deref().unwrap_or(DEFAULT_HOST),
                self.port.unwrap_or(DEFAULT_PORT),
            ),
        };
        address.with_secret(self.secret.as_deref())
    }
}

/// Server lifecycle, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Publishing,
    WaitingForClient,
    SessionActive,
    TearingDown,
    Terminated,
}

/// Server error.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("Session error: {0}")]
    Session(#[from] CallError),
    #[error("Evaluator error: {0}")]
    Eval(#[from] EvalError),
    #[error("Client did not supply {0}")]
    MissingEndpoint(Field),
}

/// Puts the evaluator's configuration back when the session scope ends.
struct ConfigRestore<'a> {
    evaluator: &'a dyn Evaluator,
    previous: Option<EvalConfig>,
}

impl Drop for ConfigRestore<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.evaluator.swap_config(previous);
            tracing::debug!("Evaluator configuration restored");
        }
    }
}

/// A published, not yet finished, remote session.
pub struct Server {
    evaluator: Arc<dyn Evaluator>,
    record: Arc<SessionRecord>,
    service: Service,
    session_id: Uuid,
    state: watch::Sender<ServerState>,
}

impl Server {
    /// Publish an empty session record at the configured address.
    ///
    /// # Errors
    /// Returns error if the address cannot be bound.
    pub async fn publish(
        evaluator: Arc<dyn Evaluator>,
        options: &ServerOptions,
    ) -> Result<Self, ServerError> {
        let (state, _) = watch::channel(ServerState::Publishing);
        let session_id = Uuid::new_v4();
        let record = Arc::new(SessionRecord::new());
        let front = Arc::clone(&record) as Arc<dyn RemoteProxy>;
        let service = Service::start(&options.address(), Some(front)).await?;
        tracing::info!(%session_id, uri = %service.uri(), "Session record published");

        Ok(Self {
            evaluator,
            record,
            service,
            session_id,
            state,
        })
    }

    /// Address clients connect to, with the real port.
    #[must_use]
    pub fn uri(&self) -> &ConnectionAddress {
        self.service.uri()
    }

    #[must_use]
    pub const fn record(&self) -> &Arc<SessionRecord> {
        &self.record
    }

    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Observe state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    fn transition(&self, state: ServerState) {
        tracing::info!(session_id = %self.session_id, ?state, "Server state");
        self.state.send_replace(state);
    }

    /// Wait for a client, run one session and tear everything down.
    ///
    /// Teardown happens whatever the session's outcome.
    ///
    /// # Errors
    /// Returns the session's error after teardown.
    pub async fn run(mut self) -> Result<(), ServerError> {
        self.transition(ServerState::WaitingForClient);
        status::announce(&format!("Waiting for client on {}", self.uri()));
        self.record.wait().await;
        status::announce("Client received, starting remote session");

        self.transition(ServerState::SessionActive);
        let result = self.session().await;
        if let Err(e) = &result {
            tracing::error!(session_id = %self.session_id, "Session failed: {e}");
        }

        self.teardown().await;
        result
    }

    fn endpoint(&self, field: Field) -> Result<Handle, ServerError> {
        self.record
            .get(field)
            .ok_or(ServerError::MissingEndpoint(field))
    }

    /// Default a capture stream to this process's console.
    fn capture_endpoint(&self, field: Field, console: SharedWriter) -> Handle {
        if let Some(handle) = self.record.get(field) {
            return handle;
        }
        let handle = self
            .service
            .registry()
            .local(Arc::new(OutputProxy::capture(Arc::new(console))));
        self.record.set(field, Some(handle.clone()));
        handle
    }

    async fn session(&self) -> Result<(), ServerError> {
        let stdout = self.capture_endpoint(Field::Stdout, SharedWriter::stdout());
        let stderr = self.capture_endpoint(Field::Stderr, SharedWriter::stderr());
        let input = self.endpoint(Field::Input)?;
        let output = Arc::new(RemoteSink::new(self.endpoint(Field::Output)?));

        let capture = CaptureGuard::acquire(
            Arc::new(RemoteSink::new(stdout)),
            Arc::new(RemoteSink::new(stderr)),
        )?;
        let mut hooks = Hooks::new();
        capture.install(&mut hooks);

        let record = Arc::clone(&self.record);
        let registry = Arc::clone(self.service.registry());
        hooks.before_session(
            "remote_repl_evaluator",
            move |handle: Arc<dyn EvaluatorHandle>| {
                let proxy = registry.local(Arc::new(EvaluatorProxy::new(handle)));
                record.set(Field::Evaluator, Some(proxy));
            },
        );

        let shell = Arc::new(StreamingShell::new());
        let _config = ConfigRestore {
            evaluator: self.evaluator.as_ref(),
            previous: Some(self.evaluator.swap_config(EvalConfig::remote(shell))),
        };

        let input = RemoteInput::connect(input, Arc::clone(self.service.registry())).await?;
        self.evaluator
            .start(SessionIo {
                input: Arc::new(input),
                output,
                hooks,
            })
            .await?;

        tracing::info!(session_id = %self.session_id, "Evaluator finished");
        Ok(())
    }

    async fn teardown(&mut self) {
        self.transition(ServerState::TearingDown);
        status::announce("Remote session terminated");

        if let Err(e) = self.record.kill().await {
            tracing::warn!(session_id = %self.session_id, "Failed to signal client: {e}");
            status::announce("Continuing to stop service");
        }

        status::announce("Ensure stop service");
        self.record.clear();
        self.service.stop().await;
        self.transition(ServerState::Terminated);
    }
}

/// Publish a session for `evaluator` and serve one client, returning when
/// that session has ended and the service is stopped.
///
/// # Errors
/// Returns error if the address cannot be bound or the session fails.
pub async fn remote_repl(
    evaluator: Arc<dyn Evaluator>,
    options: ServerOptions,
) -> Result<(), ServerError> {
    Server::publish(evaluator, &options).await?.run().await
}
