//! User-facing status lines, printed on the real console.

/// Prefix of every status line.
pub const PREFIX: &str = "[remote-repl]";

#[must_use]
pub fn line(message: &str) -> String {
    format!("{PREFIX} {message}")
}

/// Print `message` as a status line and log it.
pub fn announce(message: &str) {
    tracing::info!("{message}");
    println!("{}", line(message));
}
