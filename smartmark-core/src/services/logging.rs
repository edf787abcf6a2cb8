//! Logging service - usage events persisted in logs.duckdb
//!
//! `tracing` output is for the terminal; this log outlives the process so
//! `smk logs` can show which commands ran and which ones failed. Bookmark
//! titles and URLs are never recorded, only events and backend messages.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use duckdb::{Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::log_migrations::LOG_MIGRATIONS;
use crate::services::migration::MigrationService;

pub const LOG_DB_FILE: &str = "logs.duckdb";

const ENTRY_COLUMNS: &str = "id, timestamp, app_version, platform, event, backend, command, \
     error_message, error_details";

/// Something worth recording, built up by the command that saw it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl LogEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            backend: None,
            command: None,
            error_message: None,
            error_details: None,
        }
    }

    /// "local" or "supabase"
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// User-facing message, e.g. "Failed to add bookmark"
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Backend text behind the message
    pub fn with_error_details(mut self, details: impl Into<String>) -> Self {
        self.error_details = Some(details.into());
        self
    }
}

/// A stored event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    /// Unix milliseconds
    pub timestamp: i64,
    pub app_version: String,
    pub platform: String,
    pub event: String,
    pub backend: Option<String>,
    pub command: Option<String>,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
}

impl LogEntry {
    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }

    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            app_version: row.get(2)?,
            platform: row.get(3)?,
            event: row.get(4)?,
            backend: row.get(5)?,
            command: row.get(6)?,
            error_message: row.get(7)?,
            error_details: row.get(8)?,
        })
    }
}

/// Totals for `smk logs stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogStats {
    pub total: u64,
    pub errors: u64,
    /// Unix milliseconds of the oldest and newest entries
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
}

pub struct LoggingService {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    app_version: String,
    last_id: AtomicI64,
}

impl LoggingService {
    /// Open (or create) logs.duckdb in `smartmark_dir`
    pub fn new(smartmark_dir: &Path, app_version: impl Into<String>) -> Result<Self> {
        let db_path = smartmark_dir.join(LOG_DB_FILE);
        let conn = Connection::open(&db_path)?;

        let migrated = MigrationService::with_migrations(&conn, LOG_MIGRATIONS).run_pending()?;
        if !migrated.applied.is_empty() {
            debug!(applied = ?migrated.applied, "Log database migrated");
        }

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            app_version: app_version.into(),
            last_id: AtomicI64::new(0),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))
    }

    /// Microsecond clock, bumped so ids stay unique within this process
    fn next_id(&self, now: DateTime<Utc>) -> u64 {
        let micros = now.timestamp_micros();
        let previous = self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(micros.max(last + 1)))
            .unwrap_or(micros);
        micros.max(previous + 1) as u64
    }

    /// Stamp `event` with the time, app version and OS, and store it
    pub fn log(&self, event: LogEvent) -> Result<()> {
        let now = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            &format!("INSERT INTO sys_logs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)", ENTRY_COLUMNS),
            duckdb::params![
                self.next_id(now),
                now.timestamp_millis(),
                &self.app_version,
                std::env::consts::OS,
                &event.event,
                &event.backend,
                &event.command,
                &event.error_message,
                &event.error_details,
            ],
        )?;
        Ok(())
    }

    /// Newest first, at most `limit`; only failures when `errors_only`
    pub fn entries(&self, limit: usize, errors_only: bool) -> Result<Vec<LogEntry>> {
        let filter = if errors_only { "WHERE error_message IS NOT NULL" } else { "" };
        let sql = format!(
            "SELECT {} FROM sys_logs {} ORDER BY timestamp DESC, id DESC LIMIT ?",
            ENTRY_COLUMNS, filter
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([limit as i64], LogEntry::from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn stats(&self) -> Result<LogStats> {
        let conn = self.lock()?;
        let stats = conn.query_row(
            "SELECT COUNT(*), COUNT(error_message), MIN(timestamp), MAX(timestamp) FROM sys_logs",
            [],
            |row| {
                Ok(LogStats {
                    total: row.get(0)?,
                    errors: row.get(1)?,
                    oldest: row.get(2)?,
                    newest: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }

    /// Delete entries recorded before `cutoff`; returns how many went
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM sys_logs WHERE timestamp < ?", [cutoff.timestamp_millis()])?;
        Ok(deleted as u64)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}
