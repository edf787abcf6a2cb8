//! Storage port - durable bookmark records

use async_trait::async_trait;

use crate::domain::result::Result;
use crate::domain::{Bookmark, NewBookmark};

/// Name of the bookmarks table on every backend
pub const BOOKMARKS_TABLE: &str = "bookmarks";

/// Bookmark storage abstraction
///
/// Implementations assign `id` and `created_at` and enforce that a user only
/// sees and deletes their own rows.
#[async_trait]
pub trait BookmarkStorage: Send + Sync {
    /// All bookmarks owned by `user_id`, newest first
    async fn select_by_user(&self, user_id: &str) -> Result<Vec<Bookmark>>;

    /// Insert a bookmark and return the stored record
    async fn insert(&self, bookmark: &NewBookmark) -> Result<Bookmark>;

    /// Delete a bookmark by id. Deleting a row that does not exist is not an error.
    async fn delete(&self, id: &str, user_id: &str) -> Result<()>;
}
