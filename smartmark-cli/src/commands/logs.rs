//! Logs command - read and prune logs.duckdb

use anyhow::Result;
use chrono::{Duration, Local, TimeZone, Utc};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;

use super::get_smartmark_dir;
use crate::output;
use smartmark_core::{LogEntry, LoggingService};

#[derive(Subcommand)]
pub enum LogsCommands {
    /// Show recent events, newest first
    List {
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Only failed operations
        #[arg(long)]
        errors: bool,
        #[arg(long)]
        json: bool,
    },
    /// Delete events older than a number of days
    Clear {
        #[arg(long, default_value = "30")]
        older_than_days: u32,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        #[arg(long)]
        json: bool,
    },
    /// Event and error counts, time span, and where the log lives
    Stats {
        #[arg(long)]
        json: bool,
    },
}

fn open_log() -> Result<LoggingService> {
    let dir = get_smartmark_dir()?;
    std::fs::create_dir_all(&dir)?;
    LoggingService::new(&dir, env!("CARGO_PKG_VERSION"))
}

fn local_time(timestamp_ms: i64) -> String {
    Local
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

fn format_bytes(bytes: u64) -> String {
    match bytes {
        b if b >= 1024 * 1024 => format!("{:.1} MB", b as f64 / (1024.0 * 1024.0)),
        b if b >= 1024 => format!("{:.1} KB", b as f64 / 1024.0),
        b => format!("{} bytes", b),
    }
}

/// "Failed to add bookmark (503 Service Unavailable)"
fn error_cell(entry: &LogEntry) -> String {
    match (&entry.error_message, &entry.error_details) {
        (Some(message), Some(details)) => format!("{} ({})", message, details),
        (Some(message), None) => message.clone(),
        _ => String::new(),
    }
}

fn list(limit: usize, errors: bool, json: bool) -> Result<()> {
    let entries = open_log()?.entries(limit, errors)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        output::info("No log entries yet.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Time", "Event", "Backend", "Command", "Error"]);
    for entry in &entries {
        let event = if entry.is_error() {
            entry.event.red().to_string()
        } else {
            entry.event.clone()
        };
        table.add_row(vec![
            local_time(entry.timestamp),
            event,
            entry.backend.clone().unwrap_or_default(),
            entry.command.clone().unwrap_or_default(),
            error_cell(entry),
        ]);
    }
    println!("{}", table);

    let failed = entries.iter().filter(|e| e.is_error()).count();
    if !errors && failed > 0 {
        println!("{}", format!("{} failed; `smk logs list --errors` shows only those", failed).dimmed());
    }
    Ok(())
}

fn clear(older_than_days: u32, force: bool, json: bool) -> Result<()> {
    let service = open_log()?;

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete log entries older than {} days?", older_than_days))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let deleted = service.prune(Utc::now() - Duration::days(i64::from(older_than_days)))?;
    if json {
        println!("{}", serde_json::json!({ "deleted": deleted }));
    } else {
        output::success(&format!("Deleted {} log entries", deleted));
    }
    Ok(())
}

fn stats(json: bool) -> Result<()> {
    let service = open_log()?;
    let stats = service.stats()?;
    let db_path = service.db_path();
    let size_bytes = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "total": stats.total,
                "errors": stats.errors,
                "oldest": stats.oldest,
                "newest": stats.newest,
                "path": db_path.to_string_lossy(),
                "size_bytes": size_bytes
            })
        );
        return Ok(());
    }

    println!("{}", "Event log".bold());
    println!("  Entries: {} ({} failed)", stats.total, stats.errors);
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!("  Span:    {} to {}", local_time(oldest), local_time(newest));
    }
    println!("  File:    {} ({})", db_path.display(), format_bytes(size_bytes));
    Ok(())
}

pub fn run(command: LogsCommands) -> Result<()> {
    match command {
        LogsCommands::List { limit, errors, json } => list(limit, errors, json),
        LogsCommands::Clear {
            older_than_days,
            force,
            json,
        } => clear(older_than_days, force, json),
        LogsCommands::Stats { json } => stats(json),
    }
}
