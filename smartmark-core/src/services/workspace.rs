//! Bookmark session - one store plus one live feed for one signed-in user

use std::sync::Arc;

use tracing::warn;

use crate::domain::Session;
use crate::ports::{BookmarkStorage, ChangeFeed, ChannelStatus};
use crate::services::bookmarks::BookmarkStore;
use crate::services::feed::{FeedEvent, FeedSubscription};

/// Scoped owner of a [`BookmarkStore`] and its [`FeedSubscription`]
///
/// Created when a user signs in and closed when they sign out or another
/// user takes over. Dropping it releases the feed channel as well.
pub struct BookmarkSession {
    store: BookmarkStore,
    feed: Option<FeedSubscription>,
}

impl BookmarkSession {
    /// Subscribe to the feed (if the backend has one), then load the list.
    ///
    /// Subscribing first means changes committed during the initial load are
    /// queued rather than missed; replaying them is harmless. A load failure
    /// is recorded in the store; a subscribe failure leaves the session
    /// without live updates.
    pub async fn start(
        storage: Arc<dyn BookmarkStorage>,
        change_feed: Option<Arc<dyn ChangeFeed>>,
        session: &Session,
    ) -> Self {
        let feed = match change_feed {
            Some(feed) => match FeedSubscription::subscribe(feed, session.user_id()).await {
                Ok(sub) => Some(sub),
                Err(e) => {
                    warn!(error = %e, "Live updates unavailable");
                    None
                }
            },
            None => None,
        };

        let mut store = BookmarkStore::new(storage, session.user_id());
        // Failure is kept in the store's error message
        let _ = store.load_all().await;

        Self { store, feed }
    }

    pub fn user_id(&self) -> &str {
        self.store.user_id()
    }

    pub fn store(&self) -> &BookmarkStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut BookmarkStore {
        &mut self.store
    }

    pub fn is_live(&self) -> bool {
        self.feed.as_ref().is_some_and(|f| f.is_active())
    }

    pub fn feed_status(&self) -> ChannelStatus {
        self.feed
            .as_ref()
            .map(|f| f.status())
            .unwrap_or(ChannelStatus::Closed)
    }

    /// Wait for the next feed event, apply it to the store, and return it.
    ///
    /// Returns `None` once the feed ends. Never resolves for a session
    /// without a feed, so it can sit in a `select!` next to other sources.
    pub async fn next_change(&mut self) -> Option<FeedEvent> {
        let Some(feed) = self.feed.as_mut() else {
            return std::future::pending().await;
        };

        let event = feed.next_event().await;
        match &event {
            Some(FeedEvent::Insert(bookmark)) => {
                self.store.apply_remote_insert(bookmark.clone());
            }
            Some(FeedEvent::Delete(id)) => {
                self.store.apply_remote_delete(id);
            }
            None => {
                self.feed = None;
            }
        }
        event
    }

    /// Dispose of the feed subscription. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut feed) = self.feed.take() {
            feed.dispose().await;
        }
    }
}
