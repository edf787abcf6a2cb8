//! CLI command implementations

pub mod add;
pub mod list;
pub mod login;
pub mod logout;
pub mod logs;
pub mod remove;
pub mod status;
pub mod watch;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use smartmark_core::services::SessionGate;
use smartmark_core::{LogEvent, LoggingService, Session, SmartmarkContext};
use tracing::debug;

pub const NOT_SIGNED_IN: &str = "Not signed in. Run `smk login` first.";

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger() -> Option<LoggingService> {
    let smartmark_dir = get_smartmark_dir().ok()?;
    std::fs::create_dir_all(&smartmark_dir).ok()?;
    LoggingService::new(&smartmark_dir, env!("CARGO_PKG_VERSION")).ok()
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: &Option<LoggingService>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}

/// Get the smartmark directory from environment or default
pub fn get_smartmark_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("SMARTMARK_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".smartmark"))
        .ok_or_else(|| anyhow!("Could not find home directory; set SMARTMARK_DIR"))
}

/// Get or create smartmark context
pub fn get_context() -> Result<SmartmarkContext> {
    let smartmark_dir = get_smartmark_dir()?;
    let ctx = SmartmarkContext::new(&smartmark_dir).context("Failed to initialize smartmark context")?;
    debug!(backend = %ctx.backend(), dir = %smartmark_dir.display(), "Context ready");
    Ok(ctx)
}

/// Resolve the signed-in session, failing with the sign-in hint if there is none
pub async fn require_session(ctx: &SmartmarkContext) -> Result<(SessionGate, Session)> {
    let gate = ctx.open_gate().await;
    match gate.current() {
        Some(session) => Ok((gate, session)),
        None => Err(anyhow!(NOT_SIGNED_IN)),
    }
}

/// "You have no bookmarks yet." / "N bookmarked link(s)."
pub fn count_line(count: usize) -> String {
    match count {
        0 => "You have no bookmarks yet.".to_string(),
        1 => "1 bookmarked link.".to_string(),
        n => format!("{} bookmarked links.", n),
    }
}
