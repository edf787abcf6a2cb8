//! List command - saved bookmarks, newest first

use anyhow::{anyhow, Result};
use colored::Colorize;

use super::{count_line, get_context, require_session};
use crate::output;

pub async fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let (_gate, session) = require_session(&ctx).await?;
    let mut tab = ctx.start_session(&session).await;
    tab.close().await;
    let store = tab.store();

    if let Some(message) = store.error_message() {
        return Err(anyhow!(message.to_string()));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(store.bookmarks())?);
        return Ok(());
    }

    println!("{}", count_line(store.len()).bold());
    if store.is_empty() {
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Title", "URL", "Saved", "ID"]);
    for bookmark in store.bookmarks() {
        table.add_row(vec![
            bookmark.title.clone(),
            bookmark.url.clone(),
            output::format_created(bookmark.created_at),
            bookmark.id.dimmed().to_string(),
        ]);
    }
    println!("{}", table);
    Ok(())
}
