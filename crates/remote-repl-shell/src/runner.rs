//! Shell commands whose output is streamed into a session sink.

use std::{io, path::PathBuf, process::Stdio};

use async_trait::async_trait;
use remote_repl_core::{OutputSink, SystemHandler};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
};

use crate::shell::ShellCommand;

/// Largest chunk forwarded per read.
pub const CHUNK_SIZE: usize = 1024;

/// Runs commands through the platform shell and forwards stdout and stderr
/// to the sink as they are produced, rather than after the command exits.
///
/// A non-zero exit status, or a command that cannot be started, is reported
/// as one `Error while executing command: ...` line after all output.
#[derive(Debug, Default, Clone)]
pub struct StreamingShell {
    shell: Option<ShellCommand>,
}

impl StreamingShell {
    /// Shell runner using the platform shell.
    #[must_use]
    pub const fn new() -> Self {
        Self { shell: None }
    }

    /// Shell runner using an explicit shell program and command flag.
    #[must_use]
    pub fn with_shell(program: impl Into<PathBuf>, arg: &'static str) -> Self {
        Self {
            shell: Some(ShellCommand::new(program, arg)),
        }
    }

    /// Run `command`, returning whether it succeeded.
    pub async fn execute(&self, output: &dyn OutputSink, command: &str) -> bool {
        let shell = self.shell.clone().unwrap_or_else(ShellCommand::detect);
        let spawned = Command::new(&shell.program)
            .arg(shell.arg)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(shell = %shell.program.display(), command, "Failed to spawn command: {e}");
                report_failure(output, command).await;
                return false;
            }
        };

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out_buf = [0u8; CHUNK_SIZE];
        let mut err_buf = [0u8; CHUNK_SIZE];

        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                n = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => match n {
                    Ok(0) | Err(_) => stdout = None,
                    Ok(n) => forward(output, &out_buf[..n]).await,
                },
                n = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => match n {
                    Ok(0) | Err(_) => stderr = None,
                    Ok(n) => forward(output, &err_buf[..n]).await,
                },
            }
        }

        let success = match child.wait().await {
            Ok(status) => {
                tracing::debug!(command, ?status, "Command finished");
                status.success()
            }
            Err(e) => {
                tracing::warn!(command, "Failed to wait for command: {e}");
                false
            }
        };

        if !success {
            report_failure(output, command).await;
        }
        success
    }
}

#[async_trait]
impl SystemHandler for StreamingShell {
    async fn run(&self, output: &dyn OutputSink, command: &str) {
        self.execute(output, command).await;
    }
}

async fn read_chunk<R>(stream: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match stream {
        Some(s) => s.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn forward(output: &dyn OutputSink, data: &[u8]) {
    if let Err(e) = output.write(data).await {
        tracing::debug!("Dropping command output: {e}");
    }
}

async fn report_failure(output: &dyn OutputSink, command: &str) {
    let line = format!("Error while executing command: {command}");
    if let Err(e) = output.write_line(&line).await {
        tracing::debug!("Failed to report command failure: {e}");
    }
}
