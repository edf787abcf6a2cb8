//! Remove command - delete a bookmark

use anyhow::{anyhow, Result};
use colored::Colorize;
use dialoguer::Confirm;
use smartmark_core::LogEvent;

use super::{count_line, get_context, get_logger, log_event, require_session};

pub async fn run(id: &str, force: bool) -> Result<()> {
    let ctx = get_context()?;
    let logger = get_logger();
    let (_gate, session) = require_session(&ctx).await?;
    let mut tab = ctx.start_session(&session).await;

    let Some(bookmark) = tab.store().bookmarks().iter().find(|b| b.id == id).cloned() else {
        tab.close().await;
        return Err(anyhow!("Bookmark '{}' not found", id));
    };

    // Confirm removal unless --force
    if !force {
        println!("\n{}", format!("This will delete '{}'", bookmark.title).yellow());
        println!("{}\n", bookmark.url.dimmed());

        if !Confirm::new()
            .with_prompt("Are you sure?")
            .default(false)
            .interact()?
        {
            println!("{}\n", "Cancelled".dimmed());
            tab.close().await;
            return Ok(());
        }
    }

    let result = tab.store_mut().remove(id).await;
    let count = tab.store().len();
    tab.close().await;

    let backend = ctx.backend().to_string();
    match result {
        Ok(()) => {
            log_event(&logger, LogEvent::new("bookmark_deleted").with_backend(&backend).with_command("remove"));
            println!("\n{} Deleted '{}'", "✓".green(), bookmark.title);
            println!("{}\n", count_line(count));
            Ok(())
        }
        Err(e) => {
            log_event(
                &logger,
                LogEvent::new("bookmark_delete_failed")
                    .with_backend(&backend)
                    .with_command("remove")
                    .with_error(e.to_string()),
            );
            Err(e.into())
        }
    }
}
