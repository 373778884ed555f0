//! Serves [`EchoEvaluator`] to a `remote-repl` client.

mod evaluator;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use remote_repl_session::{ServerOptions, remote_repl};

use crate::evaluator::EchoEvaluator;

/// Publish an echoing evaluator for a remote REPL client.
#[derive(Parser, Debug)]
#[command(name = "echo-server", version)]
struct Args {
    /// JSON file with `host`, `port`, `unix` and `secret`; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short = 's', long)]
    host: Option<String>,

    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Publish on a Unix domain socket instead of TCP.
    #[arg(short = 'u', long)]
    unix: Option<PathBuf>,

    #[arg(short = 'k', long, env = "REMOTE_REPL_SECRET")]
    secret: Option<String>,

    /// Serve one session after another until interrupted.
    #[arg(long)]
    forever: bool,
}

impl Args {
    fn server_options(&self) -> anyhow::Result<ServerOptions> {
        let mut options = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str::<ServerOptions>(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => ServerOptions::default(),
        };
        if self.host.is_some() {
            options.host.clone_from(&self.host);
        }
        if self.port.is_some() {
            options.port = self.port;
        }
        if self.unix.is_some() {
            options.unix.clone_from(&self.unix);
        }
        if self.secret.is_some() {
            options.secret.clone_from(&self.secret);
        }
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let options = args.server_options()?;
    let evaluator = Arc::new(EchoEvaluator::new());

    loop {
        tracing::info!(address = %options.address(), "Publishing echo evaluator");
        remote_repl(evaluator.clone(), options.clone()).await?;
        if !args.forever {
            break;
        }
    }
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
