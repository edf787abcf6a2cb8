//! Watch command - follow bookmark changes live
//!
//! Prints every insert and delete the change feed reports, and accepts
//! `add`, `rm` and `list` lines on stdin. The local database admits one
//! process at a time, so with the local backend this is the only way to
//! make changes while watching.

use std::future::Future;

use anyhow::{anyhow, Result};
use colored::Colorize;
use smartmark_core::services::{BookmarkSession, FeedEvent};
use smartmark_core::{LogEvent, Session};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use super::{count_line, get_context, get_logger, log_event, require_session};
use crate::output;

const HELP: &str = "Commands: add <title> <url> | rm <id> | list | quit";

enum Step {
    Change(Option<FeedEvent>),
    SessionChanged,
    Line(std::io::Result<Option<String>>),
    Interrupted,
    Idle,
}

/// Why the watch loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchEnd {
    /// Signed out, or a different user signed in
    SessionChanged,
    FeedEnded,
    Quit,
    Interrupted,
}

/// A parsed stdin line
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Add { title: &'a str, url: &'a str },
    Remove(&'a str),
    List,
    Quit,
    Empty,
    Unknown,
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "" => Input::Empty,
        "add" => match rest.rsplit_once(char::is_whitespace) {
            Some((title, url)) => Input::Add { title: title.trim(), url },
            // Let the store report the missing field
            None => Input::Add { title: rest, url: "" },
        },
        "rm" | "remove" if !rest.is_empty() => Input::Remove(rest),
        "list" | "ls" => Input::List,
        "quit" | "exit" | "q" => Input::Quit,
        _ => Input::Unknown,
    }
}

fn print_list(tab: &BookmarkSession) {
    let store = tab.store();
    println!("{}", count_line(store.len()).bold());
    for bookmark in store.bookmarks() {
        println!("  {}  {}  {}", bookmark.title, bookmark.url.dimmed(), bookmark.id.dimmed());
    }
}

/// Run one stdin line; returns false when the user asked to quit
async fn handle_line(tab: &mut BookmarkSession, line: &str) -> bool {
    match parse_input(line) {
        Input::Add { title, url } => {
            if tab.store_mut().add(title, url).await.is_err() {
                output::error(tab.store().error_message().unwrap_or("Failed to add bookmark"));
            }
        }
        Input::Remove(id) => {
            if !tab.store().contains(id) {
                output::error(&format!("Bookmark '{}' not found", id));
            } else if tab.store_mut().remove(id).await.is_err() {
                output::error(tab.store().error_message().unwrap_or("Failed to delete bookmark"));
            }
        }
        Input::List => print_list(tab),
        Input::Quit => return false,
        Input::Empty => {}
        Input::Unknown => println!("{}", HELP.dimmed()),
    }
    true
}

/// Follow `tab` until the session changes, the feed ends, the user quits,
/// or `interrupt` resolves. The caller disposes the subscriptions.
async fn watch_loop<R, I>(
    tab: &mut BookmarkSession,
    auth: &mut watch::Receiver<Option<Session>>,
    input: R,
    interrupt: I,
) -> WatchEnd
where
    R: AsyncBufRead + Unpin,
    I: Future<Output = ()>,
{
    let user_id = tab.user_id().to_string();
    let mut lines = input.lines();
    let mut input_open = true;
    tokio::pin!(interrupt);

    loop {
        let step = tokio::select! {
            change = tab.next_change() => Step::Change(change),
            changed = auth.changed() => match changed {
                Ok(()) => {
                    // A token refresh keeps the same user
                    let same_user = auth
                        .borrow_and_update()
                        .as_ref()
                        .is_some_and(|s| s.user_id() == user_id);
                    if same_user { Step::Idle } else { Step::SessionChanged }
                }
                Err(_) => Step::SessionChanged,
            },
            line = lines.next_line(), if input_open => Step::Line(line),
            _ = &mut interrupt => Step::Interrupted,
        };

        match step {
            Step::Change(Some(FeedEvent::Insert(bookmark))) => {
                println!("{} {}  {}", "+".green().bold(), bookmark.title, bookmark.url.dimmed());
                println!("{}", count_line(tab.store().len()).dimmed());
            }
            Step::Change(Some(FeedEvent::Delete(id))) => {
                println!("{} {}", "-".red().bold(), id.dimmed());
                println!("{}", count_line(tab.store().len()).dimmed());
            }
            Step::Change(None) => return WatchEnd::FeedEnded,
            Step::SessionChanged => return WatchEnd::SessionChanged,
            Step::Line(Ok(Some(line))) => {
                if !handle_line(tab, &line).await {
                    return WatchEnd::Quit;
                }
            }
            Step::Line(_) => input_open = false,
            Step::Interrupted => return WatchEnd::Interrupted,
            Step::Idle => {}
        }
    }
}

pub async fn run() -> Result<()> {
    let ctx = get_context()?;
    let logger = get_logger();
    let (mut gate, session) = require_session(&ctx).await?;
    let mut tab = ctx.start_session(&session).await;

    if !tab.is_live() {
        tab.close().await;
        gate.close();
        return Err(anyhow!("Live updates are unavailable for the {} backend right now", ctx.backend()));
    }
    log_event(&logger, LogEvent::new("watch_started").with_backend(ctx.backend().to_string()).with_command("watch"));

    if let Some(message) = tab.store().error_message() {
        output::error(message);
    }
    print_list(&tab);
    output::info(&format!("Watching for changes ({}). Press Ctrl-C to stop.", tab.feed_status()));
    println!("{}", HELP.dimmed());

    let mut auth = gate.changes();
    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let end = watch_loop(&mut tab, &mut auth, BufReader::new(tokio::io::stdin()), interrupt).await;

    match end {
        WatchEnd::SessionChanged => output::info("Signed out"),
        WatchEnd::FeedEnded => output::warning(&format!("Live updates stopped ({})", tab.feed_status())),
        WatchEnd::Quit | WatchEnd::Interrupted => {}
    }

    tab.close().await;
    gate.close();
    Ok(())
}
