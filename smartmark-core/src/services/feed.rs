//! Change feed adapter - turns raw row changes into store operations
//!
//! One subscription listens for INSERT and DELETE on the bookmarks table.
//! The INSERT binding carries a `user_id=eq.<id>` filter for the transport,
//! and inserts are checked against the subscribing user again on arrival.
//! Deletes are passed through unfiltered because delete payloads may only
//! carry the primary key. The adapter never buffers, reorders or reconnects.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::domain::result::Result;
use crate::domain::Bookmark;
use crate::ports::{
    ChangeFeed, ChangeKind, ChangePayload, Channel, ChannelBinding, ChannelStatus, BOOKMARKS_TABLE,
};
use crate::services::bookmarks::BookmarkStore;

/// Channel name used for the bookmark subscription
pub const CHANNEL_NAME: &str = "bookmarks-realtime";

/// A normalized change relevant to the subscribing user
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Insert(Bookmark),
    Delete(String),
}

/// Receiver of normalized feed events
pub trait FeedHandler {
    fn on_insert(&mut self, bookmark: Bookmark);
    fn on_delete(&mut self, id: &str);
}

impl FeedHandler for BookmarkStore {
    fn on_insert(&mut self, bookmark: Bookmark) {
        self.apply_remote_insert(bookmark);
    }

    fn on_delete(&mut self, id: &str) {
        self.apply_remote_delete(id);
    }
}

/// Live subscription to bookmark changes for one user
pub struct FeedSubscription {
    feed: Arc<dyn ChangeFeed>,
    channel: Option<Channel>,
    user_id: String,
    last_status: ChannelStatus,
}

impl FeedSubscription {
    /// Open the bookmarks channel scoped to `user_id`
    pub async fn subscribe(feed: Arc<dyn ChangeFeed>, user_id: impl Into<String>) -> Result<Self> {
        let user_id = user_id.into();
        let channel = feed.open_channel(CHANNEL_NAME, bindings_for(&user_id)).await?;
        let last_status = channel.status();
        info!(status = %last_status, "Realtime subscription status");

        Ok(Self {
            feed,
            channel: Some(channel),
            user_id,
            last_status,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_active(&self) -> bool {
        self.channel.is_some()
    }

    /// Latest transport status; `Closed` once disposed
    pub fn status(&self) -> ChannelStatus {
        self.channel
            .as_ref()
            .map(|c| c.status())
            .unwrap_or(ChannelStatus::Closed)
    }

    /// Wait for the next event for this user.
    ///
    /// Returns `None` when the subscription is disposed or the transport
    /// closed the channel. Payloads for other users and undecodable payloads
    /// are skipped.
    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        loop {
            let payload = self.channel.as_mut()?.recv().await;
            self.note_status();

            let payload = payload?;
            if let Some(event) = self.normalize(payload) {
                return Some(event);
            }
        }
    }

    /// Wait for the next event and hand it to `handler`.
    ///
    /// Returns false once the subscription has ended.
    pub async fn dispatch_next<H: FeedHandler + ?Sized>(&mut self, handler: &mut H) -> bool {
        match self.next_event().await {
            Some(FeedEvent::Insert(bookmark)) => {
                handler.on_insert(bookmark);
                true
            }
            Some(FeedEvent::Delete(id)) => {
                handler.on_delete(&id);
                true
            }
            None => false,
        }
    }

    /// Tear the channel down. Safe to call more than once.
    pub async fn dispose(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = self.feed.remove_channel(&mut channel).await {
                warn!(error = %e, channel = channel.name(), "Failed to remove realtime channel");
            }
            channel.close();
            debug!(channel = channel.name(), "Realtime channel removed");
        }
    }

    fn note_status(&mut self) {
        let status = self.status();
        if status != self.last_status {
            info!(status = %status, "Realtime subscription status");
            self.last_status = status;
        }
    }

    fn normalize(&self, payload: ChangePayload) -> Option<FeedEvent> {
        match payload.event_type {
            ChangeKind::Insert => match serde_json::from_value::<Bookmark>(payload.new) {
                Ok(bookmark) if bookmark.is_owned_by(&self.user_id) => Some(FeedEvent::Insert(bookmark)),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "Discarding undecodable insert payload");
                    None
                }
            },
            ChangeKind::Delete => match deleted_id(&payload.old) {
                Some(id) => Some(FeedEvent::Delete(id)),
                None => {
                    warn!("Discarding delete payload without an id");
                    None
                }
            },
            ChangeKind::Update => None,
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        // Closing our end is enough for transports to stop forwarding
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }
}

/// INSERT scoped to the owner, DELETE unscoped
fn bindings_for(user_id: &str) -> Vec<ChannelBinding> {
    vec![
        ChannelBinding::new(ChangeKind::Insert, BOOKMARKS_TABLE).with_eq_filter("user_id", user_id),
        ChannelBinding::new(ChangeKind::Delete, BOOKMARKS_TABLE),
    ]
}

fn deleted_id(old: &JsonValue) -> Option<String> {
    match old.get("id")? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
