//! DuckDB backend - offline bookmark storage with an in-process change feed

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::{params, Connection};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{Bookmark, NewBookmark};
use crate::ports::{
    BookmarkStorage, ChangeFeed, ChangeKind, ChangePayload, Channel, ChannelBinding, ChannelStatus,
    BOOKMARKS_TABLE,
};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Payloads buffered per channel before a slow consumer starts missing changes
const FEED_CAPACITY: usize = 256;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
        || lower.contains("could not set lock on file")
}

/// Local bookmark backend
///
/// Every committed insert and delete is published to the channels opened
/// through [`ChangeFeed`], in commit order. Inserts are stamped while the
/// connection lock is held, so commit order, `created_at` order and feed
/// order agree.
pub struct DuckDbBackend {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    changes: broadcast::Sender<ChangePayload>,
    /// Last `created_at` handed out, in microseconds; only touched under `conn`
    last_created_micros: AtomicI64,
}

impl DuckDbBackend {
    /// Open (or create) the database and apply pending migrations
    ///
    /// Retries with exponential backoff while another process holds the file.
    pub fn open(db_path: &Path) -> Result<Self> {
        let mut attempt = 0;
        let conn = loop {
            match Self::try_open_connection(db_path) {
                Ok(conn) => break conn,
                Err(e) if is_retryable_error(&e.to_string()) && attempt < MAX_RETRIES - 1 => {
                    let delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                    warn!(
                        path = %db_path.display(),
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        error = %e,
                        "Database busy, retrying in {}ms",
                        delay.as_millis()
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let (changes, _) = broadcast::channel(FEED_CAPACITY);
        let backend = Self {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
            changes,
            last_created_micros: AtomicI64::new(0),
        };
        backend.ensure_schema()?;
        Ok(backend)
    }

    /// In-memory database, used by tests and demos
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        let (changes, _) = broadcast::channel(FEED_CAPACITY);
        let backend = Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
            changes,
            last_created_micros: AtomicI64::new(0),
        };
        backend.ensure_schema()?;
        Ok(backend)
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading stays off; nothing here needs an extension
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.lock()?;
        MigrationService::new(&conn)
            .run_pending()
            .map_err(|e| Error::database(format!("Migration failed: {}", e)))
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        let result = self.run_migrations()?;
        if !result.applied.is_empty() {
            debug!(applied = ?result.applied, "Applied migrations");
        }
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Number of channels currently receiving changes
    pub fn open_channels(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Strictly increasing creation time at the stored (microsecond) precision.
    /// Callers must hold the connection lock.
    fn next_created_at(&self, _conn: &Connection) -> Result<DateTime<Utc>> {
        let now = Utc::now().timestamp_micros();
        let micros = now.max(self.last_created_micros.load(Ordering::Relaxed) + 1);
        self.last_created_micros.store(micros, Ordering::Relaxed);
        DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| Error::database(format!("Timestamp out of range: {}", micros)))
    }

    fn publish(&self, payload: ChangePayload) {
        // No open channel is not an error
        let _ = self.changes.send(payload);
    }
}

fn change(event_type: ChangeKind, new: serde_json::Value, old: serde_json::Value) -> ChangePayload {
    ChangePayload {
        schema: "public".to_string(),
        table: BOOKMARKS_TABLE.to_string(),
        event_type,
        new,
        old,
        commit_timestamp: Some(Utc::now()),
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::database(format!("Invalid created_at '{}': {}", s, e)))
}

#[async_trait]
impl BookmarkStorage for DuckDbBackend {
    async fn select_by_user(&self, user_id: &str) -> Result<Vec<Bookmark>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, url, user_id, created_at FROM bookmarks
             WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )?;

        let rows = stmt.query_map([user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut bookmarks = Vec::new();
        for row in rows {
            let (id, title, url, user_id, created_at) = row?;
            bookmarks.push(Bookmark {
                id,
                title,
                url,
                user_id,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(bookmarks)
    }

    async fn insert(&self, bookmark: &NewBookmark) -> Result<Bookmark> {
        let conn = self.lock()?;
        let created = Bookmark {
            id: Uuid::new_v4().to_string(),
            title: bookmark.title().to_string(),
            url: bookmark.url().to_string(),
            user_id: bookmark.user_id().to_string(),
            created_at: self.next_created_at(&conn)?,
        };

        conn.execute(
            "INSERT INTO bookmarks (id, title, url, user_id, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                &created.id,
                &created.title,
                &created.url,
                &created.user_id,
                format_timestamp(created.created_at),
            ],
        )?;
        self.publish(change(ChangeKind::Insert, serde_json::to_value(&created)?, json!({})));
        Ok(created)
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<()> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM bookmarks WHERE id = ? AND user_id = ?", [id, user_id])?;

        // Like a remote delete, the old image carries only the primary key
        if deleted > 0 {
            self.publish(change(ChangeKind::Delete, json!({}), json!({ "id": id })));
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for DuckDbBackend {
    async fn open_channel(&self, name: &str, bindings: Vec<ChannelBinding>) -> Result<Channel> {
        let (sink, channel) = Channel::pair(name, bindings);
        // Subscribe before returning so nothing committed after this point is missed
        let mut changes = self.changes.subscribe();
        sink.set_status(ChannelStatus::Subscribed);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sink.closed() => break,
                    received = changes.recv() => match received {
                        Ok(payload) => {
                            if !sink.deliver(&payload) {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = sink.name(), skipped, "Channel fell behind; changes dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            sink.set_status(ChannelStatus::Closed);
            debug!(channel = sink.name(), "Channel forwarder stopped");
        });

        Ok(channel)
    }

    async fn remove_channel(&self, channel: &mut Channel) -> Result<()> {
        channel.close();
        Ok(())
    }
}
