//! Shared async writers used as console sinks.

use std::{
    io::{self, IsTerminal},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, BufWriter},
    sync::Mutex,
};

use crate::traits::OutputSink;

/// Cloneable handle to a single underlying writer.
///
/// Every write is flushed straight away so interactive output is never held
/// back in the buffer.
#[derive(Clone)]
pub struct SharedWriter {
    writer: Arc<Mutex<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>>,
    terminal: bool,
    closed: Arc<AtomicBool>,
}

impl SharedWriter {
    /// Wrap an arbitrary writer.
    #[must_use]
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(BufWriter::new(Box::new(writer)))),
            terminal: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The process's own standard output.
    #[must_use]
    pub fn stdout() -> Self {
        let mut sink = Self::new(tokio::io::stdout());
        sink.terminal = io::stdout().is_terminal();
        sink
    }

    /// The process's own standard error.
    #[must_use]
    pub fn stderr() -> Self {
        let mut sink = Self::new(tokio::io::stderr());
        sink.terminal = io::stderr().is_terminal();
        sink
    }

    fn note_error(&self, err: io::Error) -> io::Error {
        if err.kind() == io::ErrorKind::BrokenPipe {
            self.closed.store(true, Ordering::Relaxed);
        }
        err
    }
}

#[async_trait]
impl OutputSink for SharedWriter {
    async fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        guard.write_all(data).await.map_err(|e| self.note_error(e))?;
        guard.flush().await.map_err(|e| self.note_error(e))
    }

    async fn flush(&self) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        guard.flush().await.map_err(|e| self.note_error(e))
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }

    fn is_eof(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_each_write_is_flushed() {
        let mock = tokio_test::io::Builder::new()
            .write(b"hello")
            .write(b"world\n")
            .build();
        let sink = SharedWriter::new(mock);

        sink.write(b"hello").await.unwrap();
        sink.write_line("world").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_line_keeps_existing_newline() {
        let mock = tokio_test::io::Builder::new().write(b"done\n").build();
        let sink = SharedWriter::new(mock);

        sink.write_line("done\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_broken_pipe_marks_eof() {
        let mock = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let sink = SharedWriter::new(mock);

        assert!(!sink.is_eof());
        assert!(sink.write(b"x").await.is_err());
        assert!(sink.is_eof());
    }
}
