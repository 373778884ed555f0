//! Line input and tab completion across the boundary.

use std::{io, sync::Arc};

use async_trait::async_trait;
use remote_repl_core::{Completer, LineSource, OutputSink};
use remote_repl_transport::{Args, CallError, Handle, OpTable, Registry, RemoteProxy, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputOp {
    ReadLine,
    AcceptsPrompt,
    SetCompleter,
}

static INPUT_OPS: OpTable<InputOp> = OpTable::new(
    "input",
    &[
        ("read_line", InputOp::ReadLine),
        ("accepts_prompt", InputOp::AcceptsPrompt),
        ("set_completer", InputOp::SetCompleter),
    ],
);

/// Exposes the client's line source to the server.
pub struct InputSourceProxy {
    source: Arc<dyn LineSource>,
    echo: Arc<dyn OutputSink>,
    accepts_prompt: bool,
}

impl InputSourceProxy {
    /// Wrap `source`. Prompts it cannot render are written to `echo`.
    #[must_use]
    pub fn new(source: Arc<dyn LineSource>, echo: Arc<dyn OutputSink>) -> Self {
        let accepts_prompt = source.accepts_prompt();
        Self {
            source,
            echo,
            accepts_prompt,
        }
    }

    async fn read_line(&self, prompt: Option<&str>) -> io::Result<Option<String>> {
        if self.accepts_prompt {
            return self.source.read_line(prompt).await;
        }
        if let Some(prompt) = prompt {
            self.echo.write(prompt.as_bytes()).await?;
            self.echo.flush().await?;
        }
        self.source.read_line(None).await
    }
}

#[async_trait]
impl RemoteProxy for InputSourceProxy {
    fn kind(&self) -> &'static str {
        INPUT_OPS.kind()
    }

    async fn invoke(
        &self,
        registry: &Arc<Registry>,
        op: &str,
        args: Vec<Value>,
    ) -> Result<Value, CallError> {
        let op_kind = INPUT_OPS.lookup(op)?;
        let args = Args::new(op, args);
        match op_kind {
            InputOp::ReadLine => {
                let line = self.read_line(args.optional_string(0)?).await?;
                Ok(Value::from(line))
            }
            InputOp::AcceptsPrompt => Ok(Value::Bool(self.accepts_prompt)),
            InputOp::SetCompleter => {
                let target = args
                    .object(0)?
                    .ok_or_else(|| CallError::bad_arguments(op, "completer is nil"))?;
                let shim = RemoteCompleter::new(registry.resolve(target)?);
                let installed = self.source.set_completer(Arc::new(shim)).await?;
                Ok(Value::Bool(installed))
            }
        }
    }
}

/// Server-side view of the client's input proxy.
///
/// Whether the remote source takes a prompt is asked once, at connection.
pub struct RemoteInput {
    handle: Handle,
    registry: Arc<Registry>,
    accepts_prompt: bool,
}

impl RemoteInput {
    /// Wrap `handle`, querying the prompt capability.
    ///
    /// A source that refuses the query is treated as taking no prompt.
    ///
    /// # Errors
    /// Returns connection errors from the query.
    pub async fn connect(handle: Handle, registry: Arc<Registry>) -> Result<Self, CallError> {
        let accepts_prompt = match handle.invoke("accepts_prompt", vec![]).await {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(e) if e.is_connection() => return Err(e),
            Err(e) => {
                tracing::debug!("Prompt capability query refused: {e}");
                false
            }
        };
        Ok(Self {
            handle,
            registry,
            accepts_prompt,
        })
    }
}

#[async_trait]
impl LineSource for RemoteInput {
    fn accepts_prompt(&self) -> bool {
        self.accepts_prompt
    }

    async fn read_line(&self, prompt: Option<&str>) -> io::Result<Option<String>> {
        let prompt = if self.accepts_prompt { prompt } else { None };
        match self.handle.invoke("read_line", vec![Value::from(prompt)]).await? {
            Value::Nil => Ok(None),
            Value::Str(line) => Ok(Some(line)),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected line value: {other:?}"),
            )),
        }
    }

    async fn set_completer(&self, completer: Arc<dyn Completer>) -> io::Result<bool> {
        let exported = self.registry.export(Arc::new(CompleterProxy::new(completer)));
        let installed = self
            .handle
            .invoke("set_completer", vec![Value::Ref(exported)])
            .await?;
        Ok(installed.as_bool().unwrap_or(false))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompleterOp {
    Complete,
}

static COMPLETER_OPS: OpTable<CompleterOp> =
    OpTable::new("completer", &[("complete", CompleterOp::Complete)]);

/// Exposes a completion callback to the other side.
pub struct CompleterProxy {
    completer: Arc<dyn Completer>,
}

impl CompleterProxy {
    #[must_use]
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self { completer }
    }
}

#[async_trait]
impl RemoteProxy for CompleterProxy {
    fn kind(&self) -> &'static str {
        COMPLETER_OPS.kind()
    }

    async fn invoke(
        &self,
        _registry: &Arc<Registry>,
        op: &str,
        args: Vec<Value>,
    ) -> Result<Value, CallError> {
        match COMPLETER_OPS.lookup(op)? {
            CompleterOp::Complete => {
                let args = Args::new(op, args);
                let candidates = self.completer.complete(args.string(0)?).await;
                Ok(Value::List(candidates.into_iter().map(Value::Str).collect()))
            }
        }
    }
}

/// Local completion callback forwarding to a remote completer proxy.
///
/// Installed into the line source so the editor only ever calls locally.
pub struct RemoteCompleter {
    handle: Handle,
}

impl RemoteCompleter {
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl Completer for RemoteCompleter {
    async fn complete(&self, line: &str) -> Vec<String> {
        match self.handle.invoke("complete", vec![Value::from(line)]).await {
            Ok(Value::List(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Str(s) => Some(s),
                    _ => None,
                })
                .collect(),
            Ok(other) => {
                tracing::debug!(?other, "Unexpected completion result");
                Vec::new()
            }
            Err(e) => {
                tracing::debug!("Completion failed: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use remote_repl_core::ConnectionAddress;

    use super::*;

    #[derive(Default)]
    struct Script {
        lines: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<Option<String>>>,
        completer: Mutex<Option<Arc<dyn Completer>>>,
        bare: bool,
    }

    impl Script {
        fn new(lines: &[&str], bare: bool) -> Self {
            Self {
                lines: Mutex::new(lines.iter().map(ToString::to_string).collect()),
                bare,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl LineSource for Script {
        fn accepts_prompt(&self) -> bool {
            !self.bare
        }

        async fn read_line(&self, prompt: Option<&str>) -> io::Result<Option<String>> {
            self.prompts.lock().unwrap().push(prompt.map(str::to_string));
            Ok(self.lines.lock().unwrap().pop_front())
        }

        async fn set_completer(&self, completer: Arc<dyn Completer>) -> io::Result<bool> {
            *self.completer.lock().unwrap() = Some(completer);
            Ok(true)
        }
    }

    #[derive(Default)]
    struct Echo(Mutex<Vec<u8>>);

    #[async_trait]
    impl OutputSink for Echo {
        async fn write(&self, data: &[u8]) -> io::Result<()> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        async fn flush(&self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Words;

    #[async_trait]
    impl Completer for Words {
        async fn complete(&self, line: &str) -> Vec<String> {
            ["puts", "print", "exit"]
                .iter()
                .filter(|w| w.starts_with(line))
                .map(ToString::to_string)
                .collect()
        }
    }

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(ConnectionAddress::tcp("127.0.0.1", 1), None))
    }

    #[tokio::test]
    async fn test_prompt_passed_through_when_accepted() {
        let registry = registry();
        let script = Arc::new(Script::new(&["1 + 1"], false));
        let echo = Arc::new(Echo::default());
        let handle = registry.local(Arc::new(InputSourceProxy::new(script.clone(), echo.clone())));

        let input = RemoteInput::connect(handle, Arc::clone(&registry)).await.unwrap();
        assert!(input.accepts_prompt());
        assert_eq!(input.read_line(Some(">> ")).await.unwrap().as_deref(), Some("1 + 1"));
        assert_eq!(input.read_line(Some(">> ")).await.unwrap(), None);

        assert_eq!(
            *script.prompts.lock().unwrap(),
            vec![Some(">> ".to_string()), Some(">> ".to_string())]
        );
        assert!(echo.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_echoed_for_sources_without_prompt() {
        let registry = registry();
        let script = Arc::new(Script::new(&["ls"], true));
        let echo = Arc::new(Echo::default());
        let proxy = InputSourceProxy::new(script.clone(), echo.clone());

        let line = proxy
            .invoke(&registry, "read_line", vec![Value::from("$ ")])
            .await
            .unwrap();
        assert_eq!(line, Value::from("ls"));
        assert_eq!(*script.prompts.lock().unwrap(), vec![None]);
        assert_eq!(echo.0.lock().unwrap().as_slice(), b"$ ");
        assert_eq!(
            proxy.invoke(&registry, "accepts_prompt", vec![]).await.unwrap(),
            Value::Bool(false)
        );
    }

    #[tokio::test]
    async fn test_completer_installed_as_local_shim() {
        let registry = registry();
        let script = Arc::new(Script::new(&[], false));
        let handle = registry.local(Arc::new(InputSourceProxy::new(
            script.clone(),
            Arc::new(Echo::default()),
        )));
        let input = RemoteInput::connect(handle, Arc::clone(&registry)).await.unwrap();

        assert!(input.set_completer(Arc::new(Words)).await.unwrap());

        let installed = script.completer.lock().unwrap().clone().unwrap();
        assert_eq!(installed.complete("p").await, vec!["puts", "print"]);
        assert!(installed.complete("z").await.is_empty());
    }

    #[tokio::test]
    async fn test_refused_capability_query_means_no_prompt() {
        struct Refusing;

        #[async_trait]
        impl RemoteProxy for Refusing {
            fn kind(&self) -> &'static str {
                "refusing"
            }

            async fn invoke(
                &self,
                _registry: &Arc<Registry>,
                op: &str,
                _args: Vec<Value>,
            ) -> Result<Value, CallError> {
                Err(CallError::NotPermitted {
                    kind: "refusing".to_string(),
                    op: op.to_string(),
                })
            }
        }

        let registry = registry();
        let handle = registry.local(Arc::new(Refusing));
        let input = RemoteInput::connect(handle, registry).await.unwrap();
        assert!(!input.accepts_prompt());
    }

    #[tokio::test]
    async fn test_other_operations_are_not_permitted() {
        let registry = registry();
        let input = InputSourceProxy::new(Arc::new(Script::default()), Arc::new(Echo::default()));
        let completer = CompleterProxy::new(Arc::new(Words));

        for op in ["write", "close", "gets", "instance_variable_get", "complete"] {
            let err = input.invoke(&registry, op, vec![]).await.unwrap_err();
            assert!(err.is_not_permitted(), "{op}: {err}");
        }
        for op in ["read_line", "call", "clear"] {
            let err = completer.invoke(&registry, op, vec![]).await.unwrap_err();
            assert!(err.is_not_permitted(), "{op}: {err}");
        }
    }
}
