//! `remote-repl` entry point.

use clap::Parser;
use remote_repl::ClientArgs;
use remote_repl_session::{Client, ClientError, Terminal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ClientArgs::parse();
    init_tracing();

    let history = args.history();
    let options = args.into_options()?;
    tracing::debug!(server = %options.server, "Starting client");

    let client = Client::new(options, Terminal::console(history))?;
    match client.run().await {
        Ok(()) => Ok(()),
        Err(ClientError::ServerGone(e)) => {
            tracing::error!(error = %e, "Server went away");
            std::process::exit(1);
        }
        Err(ClientError::Interrupted) => std::process::exit(1),
        Err(e) => Err(e.into()),
    }
}

/// Logs go to stderr, quiet by default so they do not interleave with the
/// remote session. `RUST_LOG` overrides.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
