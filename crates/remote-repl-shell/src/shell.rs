//! Cross-platform shell detection.

use std::path::{Path, PathBuf};

/// Program and flag used to hand a command line to a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: PathBuf,
    pub arg: &'static str,
}

impl ShellCommand {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, arg: &'static str) -> Self {
        Self {
            program: program.into(),
            arg,
        }
    }

    /// The platform shell.
    ///
    /// - Windows: `cmd /C`
    /// - Unix-like: `$SHELL -c` when it names an existing absolute path,
    ///   otherwise `sh -c` found on `PATH`
    #[must_use]
    pub fn detect() -> Self {
        if cfg!(windows) {
            return Self::new("cmd", "/C");
        }
        std::env::var_os("SHELL")
            .and_then(|shell| Self::from_login_shell(Path::new(&shell)))
            .unwrap_or_else(|| {
                let sh = which::which("sh").unwrap_or_else(|_| PathBuf::from("/bin/sh"));
                Self::new(sh, "-c")
            })
    }

    /// `path -c`, if `path` is an absolute path to an existing file.
    #[must_use]
    pub fn from_login_shell(path: &Path) -> Option<Self> {
        (path.is_absolute() && path.is_file()).then(|| Self::new(path, "-c"))
    }
}

impl Default for ShellCommand {
    fn default() -> Self {
        Self::detect()
    }
}
