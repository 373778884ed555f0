//! A deliberately small evaluator: it echoes what it reads.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use remote_repl_core::{Completer, EvalConfig, EvalError, Evaluator, EvaluatorHandle, SessionIo};
use remote_repl_session::capture;

const COMMANDS: &[&str] = &["exit", "help", "status"];

const HELP: &str = "\
Type anything to have it echoed back.
  !<command>  run a shell command on the server
  status      show how many lines were evaluated
  help        show this text
  exit        end the session";

struct Counter(Arc<AtomicU64>);

impl EvaluatorHandle for Counter {
    fn status(&self) -> String {
        format!("{} lines evaluated", self.0.load(Ordering::Relaxed))
    }
}

struct Commands;

#[async_trait]
impl Completer for Commands {
    async fn complete(&self, line: &str) -> Vec<String> {
        COMMANDS
            .iter()
            .filter(|c| c.starts_with(line))
            .map(ToString::to_string)
            .collect()
    }
}

pub struct EchoEvaluator {
    config: Mutex<EvalConfig>,
    evaluated: Arc<AtomicU64>,
}

impl EchoEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Mutex::new(EvalConfig::default()),
            evaluated: Arc::default(),
        }
    }

    fn config(&self) -> EvalConfig {
        self.config
            .lock()
            .map_or_else(|poisoned| poisoned.into_inner().clone(), |c| c.clone())
    }
}

impl Default for EchoEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Evaluator for EchoEvaluator {
    async fn start(&self, io: SessionIo) -> Result<(), EvalError> {
        let handle: Arc<dyn EvaluatorHandle> = Arc::new(Counter(Arc::clone(&self.evaluated)));
        io.hooks.run_before_session(&handle);

        if !io.input.set_completer(Arc::new(Commands)).await? {
            tracing::debug!("Input has no completion support");
        }

        loop {
            let prompt = format!("echo[{}]> ", self.evaluated.load(Ordering::Relaxed));
            let line = if io.input.accepts_prompt() {
                io.input.read_line(Some(&prompt)).await?
            } else {
                io.output.write(prompt.as_bytes()).await?;
                io.input.read_line(None).await?
            };
            let Some(line) = line else { break };
            let line = line.trim();
            match line {
                "" => continue,
                "exit" => break,
                _ => {}
            }

            io.hooks.run_before_eval();
            match line {
                "help" => io.output.write_line(HELP).await?,
                "status" => io.output.write_line(&handle.status()).await?,
                _ => {
                    if let Some(command) = line.strip_prefix('!') {
                        match self.config().system {
                            Some(system) => system.run(io.output.as_ref(), command).await,
                            None => io.output.write_line("Shell commands are disabled").await?,
                        }
                    } else {
                        // Goes wherever the process's stdout currently points.
                        capture::puts(&format!("echo-server saw: {line}")).await?;
                        io.output.write_line(&format!("=> {line}")).await?;
                    }
                }
            }
            self.evaluated.fetch_add(1, Ordering::Relaxed);
            io.hooks.run_after_eval();
        }

        Ok(())
    }

    fn swap_config(&self, config: EvalConfig) -> EvalConfig {
        match self.config.lock() {
            Ok(mut current) => std::mem::replace(&mut *current, config),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_commands() {
        assert_eq!(Commands.complete("st").await, vec!["status"]);
        assert_eq!(Commands.complete("").await.len(), COMMANDS.len());
    }

    #[test]
    fn test_swap_config_returns_previous() {
        let evaluator = EchoEvaluator::new();
        let previous = evaluator.swap_config(EvalConfig {
            pager: false,
            ..EvalConfig::default()
        });
        assert!(previous.pager);
        assert!(!evaluator.config().pager);
    }
}
