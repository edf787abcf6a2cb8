//! Session domain model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::user::User;

/// How close to expiry a session must be before it is refreshed
const REFRESH_MARGIN_SECS: i64 = 60;

/// An authenticated session issued by the identity provider
///
/// "No session" is `Option::<Session>::None`; there is no invalid-but-present
/// state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn email(&self) -> &str {
        &self.user.email
    }

    /// True when the session expires within the refresh margin
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - now <= Duration::seconds(REFRESH_MARGIN_SECS),
            None => false,
        }
    }
}

/// Kind of authentication state change reported by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

impl std::fmt::Display for AuthChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthChangeEvent::SignedIn => "SIGNED_IN",
            AuthChangeEvent::SignedOut => "SIGNED_OUT",
            AuthChangeEvent::TokenRefreshed => "TOKEN_REFRESHED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_expiring_at(expires_at: Option<DateTime<Utc>>) -> Session {
        Session {
            user: User::new("user-1", "me@example.com"),
            access_token: "token".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at,
        }
    }

    #[test]
    fn test_needs_refresh() {
        let now = Utc::now();
        assert!(session_expiring_at(Some(now + Duration::seconds(30))).needs_refresh(now));
        assert!(session_expiring_at(Some(now - Duration::seconds(5))).needs_refresh(now));
        assert!(!session_expiring_at(Some(now + Duration::hours(1))).needs_refresh(now));
        assert!(!session_expiring_at(None).needs_refresh(now));
    }

    #[test]
    fn test_accessors() {
        let session = session_expiring_at(None);
        assert_eq!(session.user_id(), "user-1");
        assert_eq!(session.email(), "me@example.com");
    }
}
