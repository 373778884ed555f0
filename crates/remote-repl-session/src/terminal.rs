//! The client's own terminal.
//!
//! On a tty input goes through a line editor with history recall and
//! completion; otherwise lines are read straight off the stream.

use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex, RwLock},
};

use async_trait::async_trait;
use remote_repl_core::{Completer, LineSource, OutputSink, SharedWriter};
use rustyline::{
    Context, Editor, Helper, completion, error::ReadlineError, highlight::Highlighter,
    hint::Hinter, history::DefaultHistory, validate::Validator,
};
use tokio::{
    fs::OpenOptions,
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines},
    sync::Mutex,
};

/// History file name, relative to the home directory.
pub const HISTORY_FILE: &str = ".remote_repl_history";

/// Default history file location, if a home directory is known.
#[must_use]
pub fn default_history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HISTORY_FILE))
}

type BoxedLines = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;
type CompleterSlot = Arc<RwLock<Option<Arc<dyn Completer>>>>;
type LineEditor = Editor<LineHelper, DefaultHistory>;

/// Editor callbacks. Completion is forwarded to whatever completer the
/// evaluator installed.
pub struct LineHelper {
    completer: CompleterSlot,
}

impl LineHelper {
    fn new(completer: CompleterSlot) -> Self {
        Self { completer }
    }

    /// Completions for `line`. Must be called off the async runtime, as the
    /// editor does from its blocking thread.
    #[must_use]
    pub fn candidates(&self, line: &str) -> Vec<String> {
        let completer = self.completer.read().ok().and_then(|c| c.clone());
        let Some(completer) = completer else {
            return Vec::new();
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime.block_on(completer.complete(line)),
            Err(e) => {
                tracing::debug!("Completion outside the runtime: {e}");
                Vec::new()
            }
        }
    }
}

impl completion::Completer for LineHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        Ok((0, self.candidates(&line[..pos])))
    }
}

impl Hinter for LineHelper {
    type Hint = String;
}

impl Highlighter for LineHelper {}

impl Validator for LineHelper {}

impl Helper for LineHelper {}

enum Backend {
    Editor(Arc<StdMutex<LineEditor>>),
    Stream {
        lines: Mutex<BoxedLines>,
        prompt: Arc<dyn OutputSink>,
    },
}

/// Line source for the local user.
///
/// Renders the prompt itself and records every non-empty line in the
/// history file, if one is set.
pub struct TerminalInput {
    backend: Backend,
    completer: CompleterSlot,
    history: Option<PathBuf>,
}

impl TerminalInput {
    /// Plain line reader over a byte stream; no editing or completion.
    #[must_use]
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static, prompt: Arc<dyn OutputSink>) -> Self {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            backend: Backend::Stream {
                lines: Mutex::new(BufReader::new(reader).lines()),
                prompt,
            },
            completer: CompleterSlot::default(),
            history: None,
        }
    }

    /// Line editor on the controlling terminal, recalling `history`.
    ///
    /// # Errors
    /// Returns error if the editor cannot be set up.
    pub fn line_editor(history: Option<PathBuf>) -> io::Result<Self> {
        let completer = CompleterSlot::default();
        let mut editor = LineEditor::new().map_err(into_io)?;
        editor.set_helper(Some(LineHelper::new(Arc::clone(&completer))));
        if let Some(path) = &history {
            if let Err(e) = editor.load_history(path) {
                tracing::debug!(path = %path.display(), "No history loaded: {e}");
            }
        }
        Ok(Self {
            backend: Backend::Editor(Arc::new(StdMutex::new(editor))),
            completer,
            history,
        })
    }

    /// Line editor when stdin is a terminal, plain reader otherwise.
    #[must_use]
    pub fn stdin(history: Option<PathBuf>) -> Self {
        if std::io::IsTerminal::is_terminal(&std::io::stdin()) {
            match Self::line_editor(history.clone()) {
                Ok(input) => return input,
                Err(e) => tracing::warn!("Line editor unavailable: {e}"),
            }
        }
        Self::new(tokio::io::stdin(), Arc::new(SharedWriter::stdout())).with_history(history)
    }

    #[must_use]
    pub fn with_history(mut self, path: Option<PathBuf>) -> Self {
        self.history = path;
        self
    }

    async fn remember(path: &Path, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        file.flush().await
    }

    async fn edit_line(
        editor: &Arc<StdMutex<LineEditor>>,
        prompt: &str,
        history: Option<PathBuf>,
    ) -> io::Result<Option<String>> {
        let editor = Arc::clone(editor);
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            let mut editor = editor
                .lock()
                .map_err(|_| io::Error::other("line editor poisoned"))?;
            match editor.readline(&prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = editor.add_history_entry(line.as_str());
                        if let Some(path) = &history {
                            if let Err(e) = editor.append_history(path) {
                                tracing::warn!(path = %path.display(), "Failed to write history: {e}");
                            }
                        }
                    }
                    Ok(Some(line))
                }
                // Ctrl-C discards the line being edited.
                Err(ReadlineError::Interrupted) => Ok(Some(String::new())),
                Err(ReadlineError::Eof) => Ok(None),
                Err(e) => Err(into_io(e)),
            }
        })
        .await
        .map_err(io::Error::other)?
    }
}

fn into_io(e: ReadlineError) -> io::Error {
    match e {
        ReadlineError::Io(e) => e,
        other => io::Error::other(other),
    }
}

#[async_trait]
impl LineSource for TerminalInput {
    async fn read_line(&self, prompt: Option<&str>) -> io::Result<Option<String>> {
        let (lines, prompt_sink) = match &self.backend {
            Backend::Editor(editor) => {
                return Self::edit_line(editor, prompt.unwrap_or_default(), self.history.clone())
                    .await;
            }
            Backend::Stream { lines, prompt } => (lines, prompt),
        };

        if let Some(prompt) = prompt {
            prompt_sink.write(prompt.as_bytes()).await?;
            prompt_sink.flush().await?;
        }

        let line = lines.lock().await.next_line().await?;
        if let (Some(line), Some(path)) = (&line, &self.history) {
            if !line.trim().is_empty() {
                if let Err(e) = Self::remember(path, line).await {
                    tracing::warn!(path = %path.display(), "Failed to write history: {e}");
                }
            }
        }
        Ok(line)
    }

    /// Completion only works through the line editor.
    async fn set_completer(&self, completer: Arc<dyn Completer>) -> io::Result<bool> {
        let mut slot = self
            .completer
            .write()
            .map_err(|_| io::Error::other("completer slot poisoned"))?;
        *slot = Some(completer);
        Ok(matches!(self.backend, Backend::Editor(_)))
    }
}
