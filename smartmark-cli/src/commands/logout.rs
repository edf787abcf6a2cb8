//! Logout command - sign out and forget the stored session

use anyhow::Result;
use smartmark_core::LogEvent;

use super::{get_context, get_logger, log_event};
use crate::output;

pub async fn run() -> Result<()> {
    let ctx = get_context()?;
    let logger = get_logger();
    let gate = ctx.open_gate().await;

    if !gate.is_signed_in() {
        output::info("Not signed in.");
        return Ok(());
    }

    let backend = ctx.backend().to_string();
    if let Err(e) = gate.sign_out().await {
        // The local session is gone either way; only the server call failed
        log_event(
            &logger,
            LogEvent::new("logout_failed")
                .with_backend(&backend)
                .with_command("logout")
                .with_error("Error signing out")
                .with_error_details(e.to_string()),
        );
        output::warning(&format!("Signed out locally, but the server reported: {}", e));
        return Ok(());
    }

    log_event(&logger, LogEvent::new("logout").with_backend(&backend).with_command("logout"));
    output::success("Signed out");
    Ok(())
}
