//! Supabase REST (PostgREST) bookmark storage
//!
//! Row-level security on the server keeps users apart; the `user_id`
//! filters here only mirror it.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use tracing::debug;

use crate::domain::result::{Error, Result};
use crate::domain::{Bookmark, NewBookmark};
use crate::ports::{BookmarkStorage, BOOKMARKS_TABLE};

use super::gotrue::{error_message, http_client, SupabaseAuth};

/// Ask PostgREST for a single object instead of a one-element array
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

pub struct SupabaseStorage {
    client: Client,
    base_url: String,
    anon_key: String,
    auth: Arc<SupabaseAuth>,
}

impl SupabaseStorage {
    pub fn new(auth: Arc<SupabaseAuth>, anon_key: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: auth.base_url().to_string(),
            anon_key: anon_key.to_string(),
            auth,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, BOOKMARKS_TABLE)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.auth.access_token().await?;
        Ok(request.header("apikey", &self.anon_key).bearer_auth(token))
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::storage(format!("{} ({})", error_message(&body), status)))
    }
}

#[async_trait]
impl BookmarkStorage for SupabaseStorage {
    async fn select_by_user(&self, user_id: &str) -> Result<Vec<Bookmark>> {
        let request = self.client.get(self.table_url()).query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", user_id)),
            ("order", "created_at.desc".to_string()),
        ]);
        let response = self.authorized(request).await?.send().await?;
        let bookmarks: Vec<Bookmark> = Self::check(response).await?.json().await?;
        debug!(count = bookmarks.len(), "Fetched bookmarks");
        Ok(bookmarks)
    }

    async fn insert(&self, bookmark: &NewBookmark) -> Result<Bookmark> {
        let request = self
            .client
            .post(self.table_url())
            .header("Prefer", "return=representation")
            .header("Accept", SINGLE_OBJECT)
            .json(bookmark);
        let response = self.authorized(request).await?.send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.table_url())
            .query(&[("id", format!("eq.{}", id)), ("user_id", format!("eq.{}", user_id))]);
        let response = self.authorized(request).await?.send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
