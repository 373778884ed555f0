//! Client side of the bridge: lends the local terminal to a remote evaluator.

use std::{io, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use remote_repl_core::{
    AddressError, ConnectionAddress, LineSource, OutputSink, SharedWriter, Transport,
};
use remote_repl_transport::{CallError, Service, ServiceError, Value};
use thiserror::Error;
use tokio::{
    net::UdpSocket,
    sync::{mpsc, watch},
    task::JoinSet,
};

use crate::{
    proxies::{InputSourceProxy, OutputProxy, ParkHandle},
    record::{Field, RemoteRecord},
    status,
    terminal::TerminalInput,
};

/// Delay between attempts to reach a server that is not up yet.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Any port will do: connecting a UDP socket sends nothing.
const ROUTE_PROBE_PORT: u16 = 9;

/// Transport for the client's own service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindProto {
    Tcp,
    Unix,
}

/// Client error.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("bind not supplied for Unix domain socket connection")]
    BindRequired,
    #[error("Invalid bind address: {0}")]
    InvalidBind(#[from] AddressError),
    #[error("Failed to determine local address: {0}")]
    LocalAddress(#[source] io::Error),
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
    #[error("Failed to reach server: {0}")]
    Connect(#[source] CallError),
    #[error("Server went away: {0}")]
    ServerGone(#[source] CallError),
    #[error("Interrupted while waiting for server")]
    Interrupted,
    #[error("Session error: {0}")]
    Call(#[from] CallError),
}

/// How to reach the server and what to do when it is not there.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Server address, secret included.
    pub server: ConnectionAddress,
    /// Local endpoint: `host[:port]` for TCP, a socket path for Unix.
    pub bind: Option<String>,
    /// Transport for `bind`; defaults to the server's transport.
    pub bind_proto: Option<BindProto>,
    /// Retry until the server appears instead of failing.
    pub wait: bool,
    /// Reconnect after every session.
    pub persist: bool,
    /// Lend the local stdout/stderr to the server process.
    pub capture: bool,
    pub retry_interval: Duration,
}

impl ClientOptions {
    #[must_use]
    pub const fn new(server: ConnectionAddress) -> Self {
        Self {
            server,
            bind: None,
            bind_proto: None,
            wait: false,
            persist: false,
            capture: true,
            retry_interval: RETRY_INTERVAL,
        }
    }

    fn proto(&self) -> BindProto {
        self.bind_proto.unwrap_or(if self.server.is_unix() {
            BindProto::Unix
        } else {
            BindProto::Tcp
        })
    }

    /// Check option combinations without touching the network.
    ///
    /// # Errors
    /// Returns `BindRequired` for a Unix endpoint without a bind path and
    /// `InvalidBind` for an unparseable TCP bind.
    pub fn validate(&self) -> Result<(), ClientError> {
        match (&self.bind, self.proto()) {
            (None, BindProto::Unix) => Err(ClientError::BindRequired),
            (Some(bind), BindProto::Tcp) => {
                tcp_bind(bind)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Address for the client's own service.
    ///
    /// Without an explicit bind this is TCP on whichever local IP routes to
    /// the server, with an OS-assigned port.
    ///
    /// # Errors
    /// Returns validation errors, or `LocalAddress` if no route is found.
    pub async fn local_address(&self) -> Result<ConnectionAddress, ClientError> {
        let address = match (&self.bind, self.proto()) {
            (None, BindProto::Unix) => return Err(ClientError::BindRequired),
            (None, BindProto::Tcp) => {
                let Transport::Tcp { host, .. } = self.server.transport() else {
                    return Err(ClientError::BindRequired);
                };
                let ip = local_ip_toward(host)
                    .await
                    .map_err(ClientError::LocalAddress)?;
                ConnectionAddress::tcp(ip.to_string(), 0)
            }
            (Some(bind), BindProto::Tcp) => tcp_bind(bind)?,
            (Some(bind), BindProto::Unix) => ConnectionAddress::unix(bind),
        };
        Ok(address.with_secret(self.server.secret()))
    }
}

fn tcp_bind(bind: &str) -> Result<ConnectionAddress, AddressError> {
    match format!("tcp://{bind}").parse() {
        Err(AddressError::MissingPort(_)) => Ok(ConnectionAddress::tcp(bind, 0)),
        parsed => parsed,
    }
}

async fn local_ip_toward(host: &str) -> io::Result<std::net::IpAddr> {
    let target = tokio::net::lookup_host((host, ROUTE_PROBE_PORT))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {host}")))?;
    let unspecified: SocketAddr = if target.is_ipv6() {
        ([0u16; 8], 0).into()
    } else {
        ([0u8; 4], 0).into()
    };
    let socket = UdpSocket::bind(unspecified).await?;
    socket.connect(target).await?;
    Ok(socket.local_addr()?.ip())
}

/// The local resources lent to the server.
pub struct Terminal {
    pub input: Arc<dyn LineSource>,
    pub output: Arc<dyn OutputSink>,
    pub stdout: Arc<dyn OutputSink>,
    pub stderr: Arc<dyn OutputSink>,
}

impl Terminal {
    /// The process's own console, recording input in `history` if given.
    #[must_use]
    pub fn console(history: Option<PathBuf>) -> Self {
        let stdout: Arc<dyn OutputSink> = Arc::new(SharedWriter::stdout());
        Self {
            input: Arc::new(TerminalInput::stdin(history)),
            output: Arc::clone(&stdout),
            stdout,
            stderr: Arc::new(SharedWriter::stderr()),
        }
    }
}

/// Client lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    RetryWait,
    Bound,
    BlockedOnSignal,
    Terminated,
}

pub struct Client {
    options: ClientOptions,
    terminal: Terminal,
    state: watch::Sender<ClientState>,
}

impl Client {
    /// # Errors
    /// Returns validation errors from the options.
    pub fn new(options: ClientOptions, terminal: Terminal) -> Result<Self, ClientError> {
        options.validate()?;
        let (state, _) = watch::channel(ClientState::Connecting);
        Ok(Self {
            options,
            terminal,
            state,
        })
    }

    #[must_use]
    pub const fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Observe state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    fn transition(&self, state: ClientState) {
        if self.state.send_replace(state) != state {
            tracing::info!(?state, "Client state");
        }
    }

    /// Run sessions until done, probing the server on every Ctrl-C.
    ///
    /// # Errors
    /// See [`Client::run_with_interrupts`].
    pub async fn run(&self) -> Result<(), ClientError> {
        let (tx, rx) = mpsc::channel(8);
        let forward = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });
        let result = self.run_with_interrupts(rx).await;
        forward.abort();
        result
    }

    /// Run one session, or sessions forever in persist mode.
    ///
    /// Every message on `interrupts` while parked triggers a health probe.
    /// One arriving while waiting for the server ends the run.
    ///
    /// # Errors
    /// Returns `Connect` when the server is unreachable and neither wait
    /// nor persist is set, `ServerGone` when a probe fails and `Interrupted`
    /// when interrupted between connection attempts.
    pub async fn run_with_interrupts(
        &self,
        mut interrupts: mpsc::Receiver<()>,
    ) -> Result<(), ClientError> {
        let result = loop {
            if let Err(e) = self.connect(&mut interrupts).await {
                break Err(e);
            }
            if !self.options.persist {
                break Ok(());
            }
            tracing::info!("Session over, reconnecting");
        };
        self.transition(ClientState::Terminated);
        result
    }

    /// One connect/park cycle. The local service is stopped on every path.
    ///
    /// # Errors
    /// See [`Client::run_with_interrupts`].
    pub async fn connect(&self, interrupts: &mut mpsc::Receiver<()>) -> Result<(), ClientError> {
        self.transition(ClientState::Connecting);
        let local = self.options.local_address().await?;
        let mut service = Service::start(&local, None).await?;
        let result = self.session(&service, interrupts).await;
        service.stop().await;
        result
    }

    async fn session(
        &self,
        service: &Service,
        interrupts: &mut mpsc::Receiver<()>,
    ) -> Result<(), ClientError> {
        let record = RemoteRecord::new(
            service.front(&self.options.server),
            Arc::clone(service.registry()),
        );
        let input = service.export(Arc::new(InputSourceProxy::new(
            Arc::clone(&self.terminal.input),
            Arc::clone(&self.terminal.output),
        )));
        let output = service.export(Arc::new(OutputProxy::new(Arc::clone(&self.terminal.output))));

        self.bind(&record, &input, &output, interrupts).await?;
        self.transition(ClientState::Bound);

        if self.options.capture {
            let stdout = service.export(Arc::new(OutputProxy::capture(Arc::clone(&self.terminal.stdout))));
            let stderr = service.export(Arc::new(OutputProxy::capture(Arc::clone(&self.terminal.stderr))));
            record.store(Field::Stdout, stdout).await?;
            record.store(Field::Stderr, stderr).await?;
        }

        // Stored last: the server starts the session as soon as it sees it.
        let park = ParkHandle::new();
        record
            .store(Field::Thread, service.export(Arc::new(park.proxy())))
            .await?;
        self.transition(ClientState::BlockedOnSignal);

        self.park(&park, &record, interrupts).await
    }

    async fn bind(
        &self,
        record: &RemoteRecord,
        input: &Value,
        output: &Value,
        interrupts: &mut mpsc::Receiver<()>,
    ) -> Result<(), ClientError> {
        let mut announced = false;
        let mut listening = true;
        loop {
            let attempt = async {
                record.store(Field::Input, input.clone()).await?;
                record.store(Field::Output, output.clone()).await
            };
            match attempt.await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_connection() && (self.options.wait || self.options.persist) => {
                    tracing::debug!(server = %self.options.server, "Server not reachable: {e}");
                    if !announced {
                        status::announce(&format!("Waiting for server at {}", self.options.server));
                        announced = true;
                    }
                    self.transition(ClientState::RetryWait);
                    let retry = tokio::time::sleep(self.options.retry_interval);
                    tokio::select! {
                        () = retry => {}
                        received = interrupts.recv(), if listening => match received {
                            Some(()) => {
                                status::announce("Interrupted while waiting for server, exiting");
                                return Err(ClientError::Interrupted);
                            }
                            None => {
                                listening = false;
                                tokio::time::sleep(self.options.retry_interval).await;
                            }
                        },
                    }
                    self.transition(ClientState::Connecting);
                }
                Err(e) => return Err(ClientError::Connect(e)),
            }
        }
    }

    async fn park(
        &self,
        park: &ParkHandle,
        record: &RemoteRecord,
        interrupts: &mut mpsc::Receiver<()>,
    ) -> Result<(), ClientError> {
        let mut probes = JoinSet::new();
        let mut listening = true;
        loop {
            tokio::select! {
                () = park.park() => {
                    tracing::info!("Session ended by server");
                    return Ok(());
                }
                received = interrupts.recv(), if listening => match received {
                    Some(()) => {
                        let record = record.clone();
                        probes.spawn(async move { probe(&record).await });
                    }
                    None => listening = false,
                },
                Some(joined) = probes.join_next(), if !probes.is_empty() => {
                    if let Ok(Err(e)) = joined {
                        status::announce("Server is not responding, exiting");
                        return Err(ClientError::ServerGone(e));
                    }
                }
            }
        }
    }
}

async fn probe(record: &RemoteRecord) -> Result<(), CallError> {
    match record.fetch(Field::Evaluator).await? {
        Some(evaluator) => {
            let status = evaluator.invoke("status", vec![]).await?;
            tracing::info!(status = status.as_str().unwrap_or_default(), "Server is alive");
        }
        None => tracing::info!("Server is alive, evaluator not started"),
    }
    Ok(())
}
