//! Bookmark list store - the in-memory bookmark list for one signed-in user
//!
//! The store is the single owner of the user's bookmark sequence. It is
//! mutated from two directions: user actions (`add`, `remove`, `load_all`)
//! that go through the storage port first, and change feed events
//! (`apply_remote_insert`, `apply_remote_delete`) that arrive on their own.
//! Both paths are idempotent per bookmark id, so whichever of "local success"
//! and "feed echo" lands first, the sequence converges to the same state.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::domain::result::{Error, Result};
use crate::domain::{Bookmark, NewBookmark, REQUIRED_FIELDS_MESSAGE};
use crate::ports::BookmarkStorage;

pub const LOAD_FAILED_MESSAGE: &str = "Failed to load bookmarks";
pub const ADD_FAILED_MESSAGE: &str = "Failed to add bookmark";
pub const DELETE_FAILED_MESSAGE: &str = "Failed to delete bookmark";

/// Lifecycle of a store instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorePhase {
    Uninitialized,
    Loading,
    Ready,
}

/// Contents of the add form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BookmarkDraft {
    pub title: String,
    pub url: String,
}

/// Point-in-time copy of the store, published after every mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSnapshot {
    pub bookmarks: Vec<Bookmark>,
    pub phase: StorePhase,
    pub loading: bool,
    pub error: Option<String>,
}

/// Bookmark list store for a single user
pub struct BookmarkStore {
    storage: Arc<dyn BookmarkStorage>,
    user_id: String,
    bookmarks: Vec<Bookmark>,
    phase: StorePhase,
    loading: bool,
    error: Option<String>,
    draft: BookmarkDraft,
    snapshots: watch::Sender<StoreSnapshot>,
}

impl BookmarkStore {
    pub fn new(storage: Arc<dyn BookmarkStorage>, user_id: impl Into<String>) -> Self {
        let (snapshots, _) = watch::channel(StoreSnapshot {
            bookmarks: Vec::new(),
            phase: StorePhase::Uninitialized,
            loading: false,
            error: None,
        });

        Self {
            storage,
            user_id: user_id.into(),
            bookmarks: Vec::new(),
            phase: StorePhase::Uninitialized,
            loading: false,
            error: None,
            draft: BookmarkDraft::default(),
            snapshots,
        }
    }

    // === Queries ===

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Bookmarks, newest first
    pub fn bookmarks(&self) -> &[Bookmark] {
        &self.bookmarks
    }

    pub fn len(&self) -> usize {
        self.bookmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bookmarks.iter().any(|b| b.id == id)
    }

    pub fn phase(&self) -> StorePhase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Message for the last failed operation, if any
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn draft(&self) -> &BookmarkDraft {
        &self.draft
    }

    pub fn set_draft(&mut self, title: impl Into<String>, url: impl Into<String>) {
        self.draft = BookmarkDraft {
            title: title.into(),
            url: url.into(),
        };
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            bookmarks: self.bookmarks.clone(),
            phase: self.phase,
            loading: self.loading,
            error: self.error.clone(),
        }
    }

    /// Subscribe to snapshots; the receiver always holds the latest one
    pub fn watch(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshots.subscribe()
    }

    // === User actions ===

    /// Replace the list with everything the backend holds for this user.
    ///
    /// On failure the previous list is kept and the generic load message is
    /// recorded; the underlying cause only goes to the log.
    pub async fn load_all(&mut self) -> Result<()> {
        self.error = None;
        self.loading = true;
        self.phase = StorePhase::Loading;
        self.publish();

        let result = match self.storage.select_by_user(&self.user_id).await {
            Ok(rows) => {
                self.bookmarks = self.visible(rows);
                debug!(count = self.bookmarks.len(), "Loaded bookmarks");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Error loading bookmarks");
                self.error = Some(LOAD_FAILED_MESSAGE.to_string());
                Err(Error::storage(LOAD_FAILED_MESSAGE))
            }
        };

        self.loading = false;
        self.phase = StorePhase::Ready;
        self.publish();
        result
    }

    /// Validate, insert remotely, then prepend the stored record.
    ///
    /// Blank title or URL fails before any remote call.
    pub async fn add(&mut self, title: &str, url: &str) -> Result<Bookmark> {
        self.error = None;
        self.set_draft(title, url);

        let new_bookmark = match NewBookmark::new(self.user_id.clone(), title, url) {
            Ok(b) => b,
            Err(e) => {
                self.error = Some(REQUIRED_FIELDS_MESSAGE.to_string());
                self.publish();
                return Err(e);
            }
        };

        match self.storage.insert(&new_bookmark).await {
            Ok(created) => {
                // The feed may have delivered this insert while we were waiting
                if !self.contains(&created.id) {
                    self.bookmarks.insert(0, created.clone());
                }
                self.draft = BookmarkDraft::default();
                self.publish();
                Ok(created)
            }
            Err(e) => {
                error!(error = %e, "Error adding bookmark");
                self.error = Some(ADD_FAILED_MESSAGE.to_string());
                self.publish();
                Err(Error::storage(ADD_FAILED_MESSAGE))
            }
        }
    }

    /// Delete remotely, then drop the entry locally if it is still there
    pub async fn remove(&mut self, id: &str) -> Result<()> {
        self.error = None;

        match self.storage.delete(id, &self.user_id).await {
            Ok(()) => {
                self.bookmarks.retain(|b| b.id != id);
                self.publish();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, bookmark_id = id, "Error deleting bookmark");
                self.error = Some(DELETE_FAILED_MESSAGE.to_string());
                self.publish();
                Err(Error::storage(DELETE_FAILED_MESSAGE))
            }
        }
    }

    // === Feed reconciliation ===

    /// Prepend a bookmark reported by the change feed.
    ///
    /// Returns whether the list changed. Records owned by another user and
    /// ids already present are ignored.
    pub fn apply_remote_insert(&mut self, bookmark: Bookmark) -> bool {
        if !bookmark.is_owned_by(&self.user_id) || self.contains(&bookmark.id) {
            return false;
        }
        self.bookmarks.insert(0, bookmark);
        self.publish();
        true
    }

    /// Remove a bookmark reported deleted by the change feed.
    ///
    /// Returns whether the list changed.
    pub fn apply_remote_delete(&mut self, id: &str) -> bool {
        let before = self.bookmarks.len();
        self.bookmarks.retain(|b| b.id != id);
        if self.bookmarks.len() == before {
            return false;
        }
        self.publish();
        true
    }

    fn visible(&self, rows: Vec<Bookmark>) -> Vec<Bookmark> {
        let mut seen = HashSet::new();
        rows.into_iter()
            .filter(|b| b.is_owned_by(&self.user_id) && seen.insert(b.id.clone()))
            .collect()
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }
}
