//! Status command - who is signed in and how many bookmarks they have

use anyhow::Result;
use colored::Colorize;
use serde_json::json;

use super::{count_line, get_context, require_session};
use crate::output;

pub async fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let (_gate, session) = require_session(&ctx).await?;
    let mut tab = ctx.start_session(&session).await;
    let store = tab.store();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "email": session.email(),
                "user_id": session.user_id(),
                "backend": ctx.backend().to_string(),
                "bookmarks": store.len(),
                "live_updates": tab.is_live(),
                "error": store.error_message(),
            }))?
        );
        tab.close().await;
        return Ok(());
    }

    println!("{}", "Smartmark Status".bold());
    println!();

    let mut table = output::create_table();
    table.add_row(vec!["Signed in as", session.email()]);
    table.add_row(vec!["User ID", session.user_id()]);
    table.add_row(vec!["Backend", &ctx.backend().to_string()]);
    table.add_row(vec!["Bookmarks", &store.len().to_string()]);
    println!("{}", table);
    println!();

    match store.error_message() {
        Some(message) => output::error(message),
        None => println!("{}", count_line(store.len())),
    }

    tab.close().await;
    Ok(())
}
