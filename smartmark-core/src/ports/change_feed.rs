//! Change feed port - realtime row change notifications
//!
//! Payloads follow the `postgres_changes` shape delivered by Supabase Realtime:
//! ```json
//! { "schema": "public", "table": "bookmarks", "eventType": "INSERT",
//!   "new": { ... }, "old": { ... }, "commit_timestamp": "..." }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, watch};

use crate::domain::result::Result;

/// Row change kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row change as delivered by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    pub schema: String,
    pub table: String,
    #[serde(rename = "eventType")]
    pub event_type: ChangeKind,
    /// New row image (empty object for deletes)
    #[serde(default)]
    pub new: JsonValue,
    /// Old row image; may only carry the primary key
    #[serde(default)]
    pub old: JsonValue,
    #[serde(default)]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

/// Which changes a channel listens for
///
/// Serializes as one entry of the `postgres_changes` join config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub event: ChangeKind,
    pub schema: String,
    pub table: String,
    /// Row filter such as `user_id=eq.42`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl ChannelBinding {
    /// Binding on a table in the `public` schema
    pub fn new(event: ChangeKind, table: impl Into<String>) -> Self {
        Self {
            event,
            schema: "public".to_string(),
            table: table.into(),
            filter: None,
        }
    }

    /// Only rows whose `column` equals `value`
    pub fn with_eq_filter(mut self, column: &str, value: &str) -> Self {
        self.filter = Some(format!("{}=eq.{}", column, value));
        self
    }

    pub fn matches(&self, payload: &ChangePayload) -> bool {
        self.event == payload.event_type
            && self.schema == payload.schema
            && self.table == payload.table
            && self.filter.as_deref().map_or(true, |f| filter_matches(f, payload))
    }
}

/// Evaluate an `eq` filter against the row image of a payload.
///
/// Other operators are left to the server and always match here.
fn filter_matches(filter: &str, payload: &ChangePayload) -> bool {
    let Some((column, expected)) = filter.split_once("=eq.") else {
        return true;
    };
    let row = match payload.event_type {
        ChangeKind::Delete => &payload.old,
        ChangeKind::Insert | ChangeKind::Update => &payload.new,
    };
    match row.get(column) {
        Some(JsonValue::String(s)) => s == expected,
        Some(JsonValue::Number(n)) => n.to_string() == expected,
        _ => false,
    }
}

/// Opaque transport status of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Joining,
    Subscribed,
    TimedOut,
    ChannelError,
    Closed,
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelStatus::Joining => "JOINING",
            ChannelStatus::Subscribed => "SUBSCRIBED",
            ChannelStatus::TimedOut => "TIMED_OUT",
            ChannelStatus::ChannelError => "CHANNEL_ERROR",
            ChannelStatus::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Consumer end of an open channel
#[derive(Debug)]
pub struct Channel {
    name: String,
    events: mpsc::UnboundedReceiver<ChangePayload>,
    status: watch::Receiver<ChannelStatus>,
}

impl Channel {
    /// Create a connected transport/consumer pair for a channel
    pub fn pair(name: impl Into<String>, bindings: Vec<ChannelBinding>) -> (ChannelSink, Channel) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Joining);
        let name = name.into();

        let sink = ChannelSink {
            name: name.clone(),
            bindings,
            events: events_tx,
            status: status_tx,
        };
        let channel = Channel {
            name,
            events: events_rx,
            status: status_rx,
        };
        (sink, channel)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next payload in transport order; `None` once the channel is closed
    pub async fn recv(&mut self) -> Option<ChangePayload> {
        self.events.recv().await
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    /// Watch handle for status changes
    pub fn status_updates(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Stop accepting payloads. Already queued payloads can still be received.
    pub fn close(&mut self) {
        self.events.close();
    }
}

/// Transport end of an open channel
#[derive(Debug)]
pub struct ChannelSink {
    name: String,
    bindings: Vec<ChannelBinding>,
    events: mpsc::UnboundedSender<ChangePayload>,
    status: watch::Sender<ChannelStatus>,
}

impl ChannelSink {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Forward a payload if any binding matches it.
    ///
    /// Returns false once the consumer has gone away.
    pub fn deliver(&self, payload: &ChangePayload) -> bool {
        if !self.bindings.iter().any(|b| b.matches(payload)) {
            return !self.events.is_closed();
        }
        self.events.send(payload.clone()).is_ok()
    }

    pub fn set_status(&self, status: ChannelStatus) {
        self.status.send_replace(status);
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    /// Resolves once the consumer has closed or dropped its end
    pub async fn closed(&self) {
        self.events.closed().await
    }
}

/// Change feed trait
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a named channel listening for the given bindings
    async fn open_channel(&self, name: &str, bindings: Vec<ChannelBinding>) -> Result<Channel>;

    /// Tear a channel down; no payloads are delivered afterwards
    async fn remove_channel(&self, channel: &mut Channel) -> Result<()>;
}
