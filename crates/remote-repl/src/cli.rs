//! Command-line arguments of the `remote-repl` client.
//!
//! Kept out of `main.rs` so tests can parse and convert them directly.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use remote_repl_core::{ConnectionAddress, DEFAULT_HOST, DEFAULT_PORT};
use remote_repl_session::{BindProto, ClientError, ClientOptions, default_history_path};

/// Connect to a remote REPL session and lend it this terminal.
#[derive(Parser, Debug)]
#[command(name = "remote-repl", version)]
pub struct ClientArgs {
    /// Host of the server.
    #[arg(short = 's', long, default_value = DEFAULT_HOST)]
    pub server: String,

    /// Port of the server.
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Wait for the server to start instead of failing.
    #[arg(short = 'w', long)]
    pub wait: bool,

    /// Reconnect after every session.
    #[arg(short = 'r', long)]
    pub persist: bool,

    /// Show the server's stdout and stderr here; "false" disables.
    #[arg(
        short = 'c',
        long,
        action = ArgAction::Set,
        default_value = "true",
        value_parser = parse_capture,
    )]
    pub capture: bool,

    /// Do not record input in the history file.
    #[arg(short = 'f')]
    pub no_history: bool,

    /// Local address the server connects back to: `host[:port]` or a
    /// socket path.
    #[arg(short = 'b', long)]
    pub bind: Option<String>,

    /// Transport for `--bind`; defaults to the server's.
    #[arg(short = 'z', long = "bind-proto", value_enum)]
    pub bind_proto: Option<CliBindProto>,

    /// Unix domain socket of the server, instead of host and port.
    #[arg(short = 'u', long)]
    pub unix: Option<PathBuf>,

    /// Shared secret for both sides of the connection.
    #[arg(short = 'k', long, env = "REMOTE_REPL_SECRET")]
    pub secret: Option<String>,
}

/// Anything but `false` enables capture.
#[allow(clippy::unnecessary_wraps)]
fn parse_capture(value: &str) -> Result<bool, String> {
    Ok(value != "false")
}

/// CLI-level transport selection, mapping 1:1 to [`BindProto`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CliBindProto {
    Tcp,
    Unix,
}

impl From<CliBindProto> for BindProto {
    fn from(proto: CliBindProto) -> Self {
        match proto {
            CliBindProto::Tcp => Self::Tcp,
            CliBindProto::Unix => Self::Unix,
        }
    }
}

impl ClientArgs {
    /// Server address, secret included.
    #[must_use]
    pub fn server_address(&self) -> ConnectionAddress {
        let address = match &self.unix {
            Some(path) => ConnectionAddress::unix(path),
            None => ConnectionAddress::tcp(self.server.clone(), self.port),
        };
        address.with_secret(self.secret.as_deref())
    }

    /// History file to append to, unless disabled.
    #[must_use]
    pub fn history(&self) -> Option<PathBuf> {
        if self.no_history {
            None
        } else {
            default_history_path()
        }
    }

    /// Convert into validated client options.
    ///
    /// # Errors
    /// Returns `BindRequired` for a Unix connection without `--bind`.
    pub fn into_options(self) -> Result<ClientOptions, ClientError> {
        let server = self.server_address();
        let options = ClientOptions {
            bind: self.bind,
            bind_proto: self.bind_proto.map(Into::into),
            wait: self.wait,
            persist: self.persist,
            capture: self.capture,
            ..ClientOptions::new(server)
        };
        options.validate()?;
        Ok(options)
    }
}
