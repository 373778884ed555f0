//! Server and client in one process, over real sockets.

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use remote_repl_core::{
    ConnectionAddress, EvalConfig, EvalError, Evaluator, EvaluatorHandle, LineSource, OutputSink,
    SessionIo,
};
use remote_repl_session::{
    Client, ClientError, ClientOptions, ClientState, Server, ServerOptions, ServerState, Terminal,
    capture,
};
use serial_test::serial;
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};

const LIMIT: Duration = Duration::from_secs(20);

#[derive(Default)]
struct Buffer(Mutex<Vec<u8>>);

impl Buffer {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[async_trait]
impl OutputSink for Buffer {
    async fn write(&self, data: &[u8]) -> io::Result<()> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Scripted terminal input. Once the script runs out it either reports end
/// of input or blocks forever.
struct Script {
    lines: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    hang: bool,
}

impl Script {
    fn new(lines: &[&str]) -> Self {
        Self {
            lines: Mutex::new(lines.iter().map(ToString::to_string).collect()),
            prompts: Mutex::default(),
            hang: false,
        }
    }

    fn hanging(lines: &[&str]) -> Self {
        Self {
            hang: true,
            ..Self::new(lines)
        }
    }
}

#[async_trait]
impl LineSource for Script {
    async fn read_line(&self, prompt: Option<&str>) -> io::Result<Option<String>> {
        if let Some(prompt) = prompt {
            self.prompts.lock().unwrap().push(prompt.to_string());
        }
        let next = self.lines.lock().unwrap().pop_front();
        if next.is_none() && self.hang {
            std::future::pending::<()>().await;
        }
        Ok(next)
    }
}

struct Running;

impl EvaluatorHandle for Running {
    fn status(&self) -> String {
        "running".to_string()
    }
}

/// Minimal evaluator: echoes expressions, runs `!commands` through the
/// configured shell handler and stops at `exit` or end of input.
struct Echo {
    config: Mutex<EvalConfig>,
}

impl Echo {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(EvalConfig::default()),
        })
    }

    fn pager(&self) -> bool {
        self.config.lock().unwrap().pager
    }
}

#[async_trait]
impl Evaluator for Echo {
    async fn start(&self, io: SessionIo) -> Result<(), EvalError> {
        let handle: Arc<dyn EvaluatorHandle> = Arc::new(Running);
        io.hooks.run_before_session(&handle);

        loop {
            let Some(line) = io.input.read_line(Some("echo> ")).await? else {
                break;
            };
            if line == "exit" {
                break;
            }

            io.hooks.run_before_eval();
            if let Some(command) = line.strip_prefix('!') {
                let system = self.config.lock().unwrap().system.clone();
                if let Some(system) = system {
                    system.run(io.output.as_ref(), command).await;
                }
            } else {
                let pager = self.pager();
                capture::puts(&format!("side effect of {line}")).await?;
                io.output
                    .write_line(&format!("=> {line} (pager {pager})"))
                    .await?;
            }
            io.hooks.run_after_eval();
        }
        Ok(())
    }

    fn swap_config(&self, config: EvalConfig) -> EvalConfig {
        std::mem::replace(&mut *self.config.lock().unwrap(), config)
    }
}

struct Lent {
    input: Arc<Script>,
    output: Arc<Buffer>,
    stdout: Arc<Buffer>,
    stderr: Arc<Buffer>,
}

impl Lent {
    fn new(input: Script) -> Self {
        Self {
            input: Arc::new(input),
            output: Arc::default(),
            stdout: Arc::default(),
            stderr: Arc::default(),
        }
    }

    fn terminal(&self) -> Terminal {
        Terminal {
            input: self.input.clone(),
            output: self.output.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }
}

fn localhost() -> ServerOptions {
    ServerOptions {
        port: Some(0),
        ..ServerOptions::default()
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn spawn_client(client: Arc<Client>) -> (mpsc::Sender<()>, JoinHandle<Result<(), ClientError>>) {
    let (tx, rx) = mpsc::channel(4);
    let task = tokio::spawn(async move { client.run_with_interrupts(rx).await });
    (tx, task)
}

async fn wait_for<T: PartialEq + Clone>(rx: &mut tokio::sync::watch::Receiver<T>, state: T) {
    timeout(LIMIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
#[serial]
async fn test_full_session() {
    let console = capture::stdout();
    let evaluator = Echo::new();
    let server = Server::publish(evaluator.clone(), &localhost()).await.unwrap();
    let mut states = server.subscribe();
    let uri = server.uri().clone();
    let server_task = tokio::spawn(server.run());

    let lent = Lent::new(Script::new(&["1 + 1", "!echo from-shell", "!exit 3", "exit"]));
    let client = Client::new(ClientOptions::new(uri), lent.terminal()).unwrap();
    let (_interrupts, client_task) = spawn_client(Arc::new(client));

    timeout(LIMIT, client_task).await.unwrap().unwrap().unwrap();
    timeout(LIMIT, server_task).await.unwrap().unwrap().unwrap();
    wait_for(&mut states, ServerState::Terminated).await;

    let output = lent.output.text();
    assert!(output.contains("=> 1 + 1 (pager false)"), "{output}");
    assert!(output.contains("from-shell\n"), "{output}");
    assert_eq!(
        output.matches("Error while executing command: exit 3").count(),
        1,
        "{output}"
    );
    assert!(!output.contains("Error while executing command: echo"), "{output}");

    assert_eq!(lent.stdout.text(), "side effect of 1 + 1\n");
    assert_eq!(lent.input.prompts.lock().unwrap().first().map(String::as_str), Some("echo> "));

    // Configuration and capture are back to their pre-session values.
    assert!(evaluator.pager());
    assert!(Arc::ptr_eq(&console, &capture::stdout()));
}

#[tokio::test]
#[serial]
async fn test_capture_disabled_leaves_client_streams_alone() {
    let server = Server::publish(Echo::new(), &localhost()).await.unwrap();
    let uri = server.uri().clone();
    let server_task = tokio::spawn(server.run());

    let lent = Lent::new(Script::new(&["quiet"]));
    let options = ClientOptions {
        capture: false,
        ..ClientOptions::new(uri)
    };
    let client = Client::new(options, lent.terminal()).unwrap();
    let (_interrupts, client_task) = spawn_client(Arc::new(client));

    timeout(LIMIT, client_task).await.unwrap().unwrap().unwrap();
    timeout(LIMIT, server_task).await.unwrap().unwrap().unwrap();

    assert!(lent.output.text().contains("=> quiet"));
    assert!(lent.stdout.text().is_empty());
}

#[tokio::test]
#[serial]
async fn test_without_wait_unreachable_server_fails_immediately() {
    let server = ConnectionAddress::tcp("127.0.0.1", free_port());
    let lent = Lent::new(Script::new(&[]));
    let client = Client::new(ClientOptions::new(server), lent.terminal()).unwrap();
    let mut states = client.subscribe();

    let (_interrupts, task) = spawn_client(Arc::new(client));
    let err = timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ClientError::Connect(_)), "{err}");
    assert_eq!(*states.borrow_and_update(), ClientState::Terminated);
}

#[tokio::test]
#[serial]
async fn test_wait_retries_until_server_appears() {
    let port = free_port();
    let lent = Lent::new(Script::new(&["late", "exit"]));
    let options = ClientOptions {
        wait: true,
        retry_interval: Duration::from_millis(50),
        ..ClientOptions::new(ConnectionAddress::tcp("127.0.0.1", port))
    };
    let client = Client::new(options, lent.terminal()).unwrap();
    let mut states = client.subscribe();
    let (_interrupts, client_task) = spawn_client(Arc::new(client));

    wait_for(&mut states, ClientState::RetryWait).await;

    let options = ServerOptions {
        port: Some(port),
        ..ServerOptions::default()
    };
    let server = Server::publish(Echo::new(), &options).await.unwrap();
    let server_task = tokio::spawn(server.run());

    timeout(LIMIT, client_task).await.unwrap().unwrap().unwrap();
    timeout(LIMIT, server_task).await.unwrap().unwrap().unwrap();
    assert!(lent.output.text().contains("=> late"));
}

#[tokio::test]
#[serial]
async fn test_persist_reconnects_after_teardown() {
    let port = free_port();
    let options = ServerOptions {
        port: Some(port),
        ..ServerOptions::default()
    };

    let first = Server::publish(Echo::new(), &options).await.unwrap();
    let first_task = tokio::spawn(first.run());

    let lent = Lent::new(Script::new(&["one", "exit", "two", "exit"]));
    let client_options = ClientOptions {
        persist: true,
        retry_interval: Duration::from_millis(50),
        ..ClientOptions::new(ConnectionAddress::tcp("127.0.0.1", port))
    };
    let client = Client::new(client_options, lent.terminal()).unwrap();
    let mut states = client.subscribe();
    let (_interrupts, client_task) = spawn_client(Arc::new(client));

    timeout(LIMIT, first_task).await.unwrap().unwrap().unwrap();
    wait_for(&mut states, ClientState::RetryWait).await;
    assert!(!client_task.is_finished());

    let second = Server::publish(Echo::new(), &options).await.unwrap();
    timeout(LIMIT, second.run()).await.unwrap().unwrap();

    let output = lent.output.text();
    assert!(output.contains("=> one"), "{output}");
    assert!(output.contains("=> two"), "{output}");

    // Persist never ends on its own.
    wait_for(&mut states, ClientState::RetryWait).await;
    client_task.abort();
}

#[tokio::test]
#[serial]
async fn test_interrupt_probes_and_exits_when_server_gone() {
    let server = Server::publish(Echo::new(), &localhost()).await.unwrap();
    let mut server_states = server.subscribe();
    let uri = server.uri().clone();
    let server_task = tokio::spawn(server.run());

    let lent = Lent::new(Script::hanging(&["warm up"]));
    let client = Client::new(ClientOptions::new(uri), lent.terminal()).unwrap();
    let mut states = client.subscribe();
    let (interrupts, client_task) = spawn_client(Arc::new(client));

    wait_for(&mut states, ClientState::BlockedOnSignal).await;
    wait_for(&mut server_states, ServerState::SessionActive).await;

    // A healthy server answers the probe and the client stays parked.
    interrupts.send(()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!client_task.is_finished());
    assert!(lent.output.text().contains("=> warm up"));

    server_task.abort();
    let _ = server_task.await;

    interrupts.send(()).await.unwrap();
    let err = timeout(LIMIT, client_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ClientError::ServerGone(_)), "{err}");
}

#[tokio::test]
#[serial]
async fn test_secret_is_shared_by_both_sides() {
    let options = ServerOptions {
        secret: Some("hunter2".to_string()),
        ..localhost()
    };
    let server = Server::publish(Echo::new(), &options).await.unwrap();
    let uri = server.uri().clone();
    assert_eq!(uri.secret(), Some("hunter2"));
    let server_task = tokio::spawn(server.run());

    // Without the secret the server is unreachable.
    let lent = Lent::new(Script::new(&[]));
    let wrong = uri.clone().with_secret(None::<String>);
    let client = Client::new(ClientOptions::new(wrong), lent.terminal()).unwrap();
    let (_interrupts, task) = spawn_client(Arc::new(client));
    let err = timeout(LIMIT, task).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Connect(_)), "{err}");

    let lent = Lent::new(Script::new(&["secret"]));
    let client = Client::new(ClientOptions::new(uri), lent.terminal()).unwrap();
    let (_interrupts, task) = spawn_client(Arc::new(client));
    timeout(LIMIT, task).await.unwrap().unwrap().unwrap();
    timeout(LIMIT, server_task).await.unwrap().unwrap().unwrap();
    assert!(lent.output.text().contains("=> secret"));
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn test_unix_socket_session() {
    let dir = tempfile::tempdir().unwrap();
    let server_path = dir.path().join("server.sock");
    let client_path = dir.path().join("client.sock");

    let options = ServerOptions {
        unix: Some(server_path.clone()),
        ..ServerOptions::default()
    };
    let server = Server::publish(Echo::new(), &options).await.unwrap();
    let uri = server.uri().clone();
    assert!(uri.is_unix());
    let server_task = tokio::spawn(server.run());

    let lent = Lent::new(Script::new(&["over unix"]));
    let client_options = ClientOptions {
        bind: Some(client_path.to_string_lossy().into_owned()),
        ..ClientOptions::new(uri)
    };
    let client = Client::new(client_options, lent.terminal()).unwrap();
    let (_interrupts, task) = spawn_client(Arc::new(client));

    timeout(LIMIT, task).await.unwrap().unwrap().unwrap();
    timeout(LIMIT, server_task).await.unwrap().unwrap().unwrap();
    assert!(lent.output.text().contains("=> over unix"));
    assert!(!server_path.exists());
    assert!(!client_path.exists());
}
