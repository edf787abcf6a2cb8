//! Add command - save a bookmark

use anyhow::{anyhow, Result};
use colored::Colorize;
use smartmark_core::{LogEvent, NewBookmark, OperationResult};

use super::{count_line, get_context, get_logger, log_event, require_session};
use crate::output;

pub async fn run(title: &str, url: &str, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let logger = get_logger();
    let (_gate, session) = require_session(&ctx).await?;

    let well_formed = NewBookmark::new(session.user_id(), title, url)
        .map(|b| b.has_well_formed_url())
        .unwrap_or(true);

    let mut tab = ctx.start_session(&session).await;
    let result = tab.store_mut().add(title, url).await;
    let message = tab.store().error_message().map(str::to_string);
    let count = tab.store().len();
    tab.close().await;

    let backend = ctx.backend().to_string();
    match &result {
        Ok(_) => log_event(&logger, LogEvent::new("bookmark_added").with_backend(&backend).with_command("add")),
        Err(e) if !e.is_validation() => log_event(
            &logger,
            LogEvent::new("bookmark_add_failed")
                .with_backend(&backend)
                .with_command("add")
                .with_error(e.to_string()),
        ),
        Err(_) => {}
    }

    if json {
        let failed = result.is_err();
        let mut report = OperationResult::from(result);
        if let Some(message) = message {
            report.error = Some(message);
        }
        println!("{}", serde_json::to_string_pretty(&report)?);
        if failed {
            return Err(anyhow!("Bookmark was not saved"));
        }
        return Ok(());
    }

    match result {
        Ok(bookmark) => {
            if !well_formed {
                output::warning(&format!("'{}' does not look like a full URL; saved anyway.", bookmark.url));
            }
            output::success(&format!("Saved '{}'", bookmark.title));
            println!("{}", format!("ID: {}", bookmark.id).dimmed());
            println!("{}", count_line(count));
            Ok(())
        }
        Err(e) => Err(anyhow!(message.unwrap_or_else(|| e.to_string()))),
    }
}
