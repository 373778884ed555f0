//! Output streams: the client-side proxy and the server-side sink over it.

use std::{fmt, io, sync::Arc};

use async_trait::async_trait;
use remote_repl_core::OutputSink;
use remote_repl_transport::{Args, CallError, Handle, OpTable, Registry, RemoteProxy, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputOp {
    Write,
    Flush,
    WriteFmt,
    WriteLine,
    Append,
    Eof,
    IsTerminal,
}

const OPS: &[(&str, OutputOp)] = &[
    ("write", OutputOp::Write),
    ("flush", OutputOp::Flush),
    ("write_fmt", OutputOp::WriteFmt),
    ("write_line", OutputOp::WriteLine),
    ("append", OutputOp::Append),
    ("eof", OutputOp::Eof),
    ("is_terminal", OutputOp::IsTerminal),
];

static OUTPUT_OPS: OpTable<OutputOp> = OpTable::new("output", OPS);
static CAPTURE_OPS: OpTable<OutputOp> = OpTable::new("capture", OPS);

/// Exposes a local output sink to the other side.
///
/// The same proxy serves the session output (`output`) and the captured
/// console streams (`capture`); only the reported kind differs.
pub struct OutputProxy {
    sink: Arc<dyn OutputSink>,
    ops: &'static OpTable<OutputOp>,
}

impl OutputProxy {
    /// Proxy for the session output.
    #[must_use]
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            sink,
            ops: &OUTPUT_OPS,
        }
    }

    /// Proxy for a captured console stream.
    #[must_use]
    pub fn capture(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            sink,
            ops: &CAPTURE_OPS,
        }
    }
}

#[async_trait]
impl RemoteProxy for OutputProxy {
    fn kind(&self) -> &'static str {
        self.ops.kind()
    }

    async fn invoke(
        &self,
        _registry: &Arc<Registry>,
        op: &str,
        args: Vec<Value>,
    ) -> Result<Value, CallError> {
        let op_kind = self.ops.lookup(op)?;
        let args = Args::new(op, args);
        match op_kind {
            OutputOp::Write => {
                let data = args.bytes(0)?;
                self.sink.write(data).await?;
                Ok(Value::Int(i64::try_from(data.len()).unwrap_or(i64::MAX)))
            }
            OutputOp::Append => {
                self.sink.write(args.bytes(0)?).await?;
                Ok(Value::Nil)
            }
            OutputOp::WriteFmt => {
                self.sink.write(args.string(0)?.as_bytes()).await?;
                Ok(Value::Nil)
            }
            OutputOp::WriteLine => {
                let mut index = 0;
                while let Some(line) = args.optional_string(index)? {
                    self.sink.write_line(line).await?;
                    index += 1;
                }
                if index == 0 {
                    self.sink.write(b"\n").await?;
                }
                Ok(Value::Nil)
            }
            OutputOp::Flush => {
                self.sink.flush().await?;
                Ok(Value::Nil)
            }
            OutputOp::Eof => Ok(Value::Bool(self.sink.is_eof())),
            // Never a terminal, whatever the delegate is attached to.
            OutputOp::IsTerminal => Ok(Value::Bool(false)),
        }
    }
}

/// Output sink whose bytes go to an output proxy, usually in the client.
#[derive(Clone)]
pub struct RemoteSink {
    handle: Handle,
}

impl RemoteSink {
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    #[must_use]
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Write pre-rendered format arguments.
    ///
    /// # Errors
    /// Returns the remote I/O error or a connection error.
    pub async fn write_fmt(&self, args: fmt::Arguments<'_>) -> io::Result<()> {
        self.handle
            .invoke("write_fmt", vec![Value::Str(args.to_string())])
            .await?;
        Ok(())
    }

    /// Write `data` and return `self` so writes can be chained.
    ///
    /// # Errors
    /// Returns the remote I/O error or a connection error.
    pub async fn append(&self, data: impl Into<Vec<u8>>) -> io::Result<&Self> {
        self.handle
            .invoke("append", vec![Value::Bytes(data.into())])
            .await?;
        Ok(self)
    }
}

#[async_trait]
impl OutputSink for RemoteSink {
    async fn write(&self, data: &[u8]) -> io::Result<()> {
        self.handle
            .invoke("write", vec![Value::Bytes(data.to_vec())])
            .await?;
        Ok(())
    }

    async fn flush(&self) -> io::Result<()> {
        self.handle.invoke("flush", vec![]).await?;
        Ok(())
    }

    async fn write_line(&self, line: &str) -> io::Result<()> {
        self.handle
            .invoke("write_line", vec![Value::from(line)])
            .await?;
        Ok(())
    }
}
