//! Evaluator-wide configuration.

use std::{fmt, sync::Arc};

use crate::traits::SystemHandler;

/// Settings an evaluator consults while running.
///
/// The server bridge overrides these for the lifetime of a remote session
/// and puts the previous values back afterwards.
#[derive(Clone)]
pub struct EvalConfig {
    /// Page long output through a pager.
    pub pager: bool,

    /// Handler for shell commands. `None` means the evaluator's own default.
    pub system: Option<Arc<dyn SystemHandler>>,

    /// External editor command.
    pub editor: Option<String>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            pager: true,
            system: None,
            editor: std::env::var("EDITOR").ok(),
        }
    }
}

impl EvalConfig {
    /// Configuration suitable for a session driven from another process:
    /// no pager, no editor, shell output routed through `system`.
    #[must_use]
    pub fn remote(system: Arc<dyn SystemHandler>) -> Self {
        Self {
            pager: false,
            system: Some(system),
            editor: None,
        }
    }
}

impl fmt::Debug for EvalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalConfig")
            .field("pager", &self.pager)
            .field("system", &self.system.as_ref().map(|_| "<handler>"))
            .field("editor", &self.editor)
            .finish()
    }
}
