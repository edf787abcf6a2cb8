//! Supabase Auth (GoTrue) client
//!
//! Sign-in is an OAuth redirect: the user opens the authorize URL, the
//! provider bounces back to `redirect_to` with the tokens in the URL fragment,
//! and that callback URL is handed to `complete_sign_in`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::result::{Error, Result};
use crate::domain::{AuthChangeEvent, Session, User};
use crate::ports::{AuthListener, AuthListeners, AuthSubscription, IdentityProvider, SignInFlow};

use super::session_file::SessionFile;

pub const SUPABASE_PROVIDER: &str = "supabase";

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl From<GoTrueUser> for User {
    fn from(user: GoTrueUser) -> Self {
        User::new(user.id, user.email.unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Option<GoTrueUser>,
}

fn expiry(expires_at: Option<i64>, expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    match (expires_at, expires_in) {
        (Some(at), _) => DateTime::from_timestamp(at, 0),
        (None, Some(secs)) => Some(Utc::now() + chrono::Duration::seconds(secs)),
        (None, None) => None,
    }
}

/// Pull a human readable message out of a GoTrue or PostgREST error body
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Identity provider backed by a Supabase project
pub struct SupabaseAuth {
    client: Client,
    base_url: String,
    anon_key: String,
    store: SessionFile,
    listeners: AuthListeners,
}

impl SupabaseAuth {
    pub fn new(base_url: &str, anon_key: &str, smartmark_dir: &Path) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            store: SessionFile::new(smartmark_dir, SUPABASE_PROVIDER),
            listeners: AuthListeners::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL the user opens to sign in with `provider`
    pub fn authorize_url(&self, provider: &str, redirect_to: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/auth/v1/authorize", self.base_url))
            .map_err(|e| Error::Config(format!("Invalid Supabase URL '{}': {}", self.base_url, e)))?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to);
        Ok(url)
    }

    /// Bearer token for data calls, refreshed when close to expiry
    pub async fn access_token(&self) -> Result<String> {
        self.get_session()
            .await?
            .map(|s| s.access_token)
            .ok_or_else(|| Error::auth("Not signed in"))
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::auth(format!("{} ({})", error_message(&body), status)))
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        let user: GoTrueUser = Self::check(response).await?.json().await?;
        Ok(user.into())
    }

    async fn refresh(&self, current: &Session) -> Result<Session> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::auth("Session expired and cannot be refreshed"))?;

        let response = self
            .client
            .post(format!("{}/auth/v1/token?grant_type=refresh_token", self.base_url))
            .header("apikey", &self.anon_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let tokens: TokenResponse = Self::check(response).await?.json().await?;

        Ok(Session {
            user: tokens.user.map(User::from).unwrap_or_else(|| current.user.clone()),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.or_else(|| current.refresh_token.clone()),
            expires_at: expiry(tokens.expires_at, tokens.expires_in),
        })
    }

    fn drop_session(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored session");
        }
        self.listeners.emit(AuthChangeEvent::SignedOut, None);
    }
}

/// Callback parameters, from the fragment if it has any, else the query
fn callback_params(callback_url: &str) -> Result<HashMap<String, String>> {
    let url = Url::parse(callback_url.trim())
        .map_err(|e| Error::validation(format!("Invalid callback URL: {}", e)))?;

    let params: HashMap<String, String> = match url.fragment().filter(|f| !f.is_empty()) {
        Some(fragment) => url::form_urlencoded::parse(fragment.as_bytes())
            .into_owned()
            .collect(),
        None => url.query_pairs().into_owned().collect(),
    };
    Ok(params)
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    fn name(&self) -> &str {
        SUPABASE_PROVIDER
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        let Some(session) = self.store.load()? else {
            return Ok(None);
        };
        if !session.needs_refresh(Utc::now()) {
            return Ok(Some(session));
        }

        debug!(user_id = session.user_id(), "Refreshing session");
        match self.refresh(&session).await {
            Ok(refreshed) => {
                self.store.save(&refreshed)?;
                self.listeners.emit(AuthChangeEvent::TokenRefreshed, Some(&refreshed));
                Ok(Some(refreshed))
            }
            Err(e) => {
                self.drop_session();
                Err(e)
            }
        }
    }

    fn on_auth_state_change(&self, listener: AuthListener) -> AuthSubscription {
        self.listeners.register(listener)
    }

    async fn sign_in_with_provider(&self, provider: &str, redirect_to: &str) -> Result<SignInFlow> {
        Ok(SignInFlow::Redirect(self.authorize_url(provider, redirect_to)?))
    }

    async fn complete_sign_in(&self, callback_url: &str) -> Result<Session> {
        let params = callback_params(callback_url)?;

        if let Some(description) = params.get("error_description").or_else(|| params.get("error")) {
            return Err(Error::auth(description.clone()));
        }
        let access_token = params
            .get("access_token")
            .cloned()
            .ok_or_else(|| Error::auth("Callback URL carries no access token"))?;

        let parse_secs = |key: &str| params.get(key).and_then(|v| v.parse::<i64>().ok());
        let user = self.fetch_user(&access_token).await?;
        let session = Session {
            user,
            access_token,
            refresh_token: params.get("refresh_token").cloned(),
            expires_at: expiry(parse_secs("expires_at"), parse_secs("expires_in")),
        };

        self.store.save(&session)?;
        info!(user_id = session.user_id(), "Signed in");
        self.listeners.emit(AuthChangeEvent::SignedIn, Some(&session));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let remote = match self.store.load() {
            Ok(Some(session)) => {
                let sent = self
                    .client
                    .post(format!("{}/auth/v1/logout", self.base_url))
                    .header("apikey", &self.anon_key)
                    .bearer_auth(&session.access_token)
                    .send()
                    .await;
                match sent {
                    Ok(response) => Self::check(response).await.map(|_| ()),
                    Err(e) => Err(e.into()),
                }
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        // The local session goes regardless of what the server said
        self.drop_session();
        remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use tempfile::tempdir;

    use crate::adapters::supabase_mock::{MockConfig, MockSupabaseServer, ANON_KEY, MOCK_EMAIL, MOCK_USER_ID};

    fn callback(server: &MockSupabaseServer, expires_in: i64) -> String {
        format!(
            "http://localhost:3000/#access_token={}&refresh_token={}&expires_in={}&token_type=bearer",
            server.access_token(),
            server.refresh_token(),
            expires_in
        )
    }

    #[test]
    fn test_authorize_url() {
        let dir = tempdir().unwrap();
        let auth = SupabaseAuth::new("https://demo.supabase.co/", "anon", dir.path()).unwrap();

        let url = auth.authorize_url("google", "http://localhost:3000").unwrap();
        assert_eq!(url.path(), "/auth/v1/authorize");
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["provider"], "google");
        assert_eq!(pairs["redirect_to"], "http://localhost:3000");
    }

    #[test]
    fn test_callback_params_fragment_then_query() {
        let from_fragment = callback_params("http://localhost:3000/?x=1#access_token=a&expires_in=10").unwrap();
        assert_eq!(from_fragment["access_token"], "a");
        assert!(!from_fragment.contains_key("x"));

        let from_query = callback_params("http://localhost:3000/?access_token=b").unwrap();
        assert_eq!(from_query["access_token"], "b");

        assert!(callback_params("not a url").is_err());
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"msg":"invalid JWT"}"#), "invalid JWT");
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token"}"#),
            "Invalid Refresh Token"
        );
        assert_eq!(error_message("plain text"), "plain text");
    }

    #[tokio::test]
    async fn test_complete_sign_in_persists_session() {
        let server = MockSupabaseServer::start(MockConfig::default()).unwrap();
        let dir = tempdir().unwrap();
        let auth = SupabaseAuth::new(&server.base_url(), ANON_KEY, dir.path()).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let events = Arc::clone(&events);
            auth.on_auth_state_change(Arc::new(move |event, _| events.lock().unwrap().push(event)))
        };

        let session = auth.complete_sign_in(&callback(&server, 3600)).await.unwrap();
        assert_eq!(session.user_id(), MOCK_USER_ID);
        assert_eq!(session.email(), MOCK_EMAIL);
        assert!(session.expires_at.is_some());

        assert_eq!(auth.get_session().await.unwrap(), Some(session));
        assert_eq!(*events.lock().unwrap(), vec![AuthChangeEvent::SignedIn]);
    }

    #[tokio::test]
    async fn test_callback_error_is_reported() {
        let dir = tempdir().unwrap();
        let auth = SupabaseAuth::new("http://127.0.0.1:9", ANON_KEY, dir.path()).unwrap();

        let err = auth
            .complete_sign_in("http://localhost:3000/#error=access_denied&error_description=User+cancelled")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("User cancelled"));
        assert!(auth.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expiring_session_is_refreshed() {
        let server = MockSupabaseServer::start(MockConfig::default()).unwrap();
        let dir = tempdir().unwrap();
        let auth = SupabaseAuth::new(&server.base_url(), ANON_KEY, dir.path()).unwrap();

        let first = auth.complete_sign_in(&callback(&server, 30)).await.unwrap();
        let refreshed = auth.get_session().await.unwrap().unwrap();
        assert_ne!(refreshed.access_token, first.access_token);
        assert_eq!(refreshed.user_id(), MOCK_USER_ID);
        assert!(!refreshed.needs_refresh(Utc::now()));
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_session() {
        let server = MockSupabaseServer::start(MockConfig {
            fail_refresh: true,
            ..Default::default()
        })
        .unwrap();
        let dir = tempdir().unwrap();
        let auth = SupabaseAuth::new(&server.base_url(), ANON_KEY, dir.path()).unwrap();

        auth.complete_sign_in(&callback(&server, 30)).await.unwrap();
        let err = auth.get_session().await.unwrap_err();
        assert!(err.to_string().contains("Invalid Refresh Token"));
        assert!(auth.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_even_when_server_fails() {
        let server = MockSupabaseServer::start(MockConfig {
            fail_logout: true,
            ..Default::default()
        })
        .unwrap();
        let dir = tempdir().unwrap();
        let auth = SupabaseAuth::new(&server.base_url(), ANON_KEY, dir.path()).unwrap();
        auth.complete_sign_in(&callback(&server, 3600)).await.unwrap();

        assert!(auth.sign_out().await.is_err());
        assert!(auth.get_session().await.unwrap().is_none());
    }
}
