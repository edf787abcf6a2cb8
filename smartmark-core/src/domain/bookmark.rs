//! Bookmark domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use url::Url;

use super::result::{Error, Result};

/// Message shown when either input field is blank
pub const REQUIRED_FIELDS_MESSAGE: &str = "Title and URL are required";

/// A saved link owned by one user
///
/// `id` and `created_at` are assigned by the storage backend; a client never
/// invents either. Bookmarks are immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub title: String,
    pub url: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    /// Whether this record belongs to the given user
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// A validated insert request
///
/// The only way to build one is [`NewBookmark::new`], so every insert that
/// reaches a storage backend has a trimmed, non-empty title and URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBookmark {
    title: String,
    url: String,
    user_id: String,
}

impl NewBookmark {
    pub fn new(user_id: impl Into<String>, title: &str, url: &str) -> Result<Self> {
        let title = title.trim();
        let url = url.trim();

        if title.is_empty() || url.is_empty() {
            return Err(Error::validation(REQUIRED_FIELDS_MESSAGE));
        }

        Ok(Self {
            title: title.to_string(),
            url: url.to_string(),
            user_id: user_id.into(),
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Whether the URL parses as an absolute URL.
    ///
    /// Only used to nudge the user; a URL that fails this check is still saved.
    pub fn has_well_formed_url(&self) -> bool {
        Url::parse(&self.url).is_ok()
    }
}

/// Deserialize an ID that can be a number or a string
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: JsonValue = Deserialize::deserialize(deserializer)?;
    match value {
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::String(s) => Ok(s),
        _ => Err(D::Error::custom("expected number or string for id")),
    }
}
