//! Local identity - offline single-user sign-in
//!
//! Signing in completes at once for the configured email. The user id is a
//! UUID v5 of the email, so it is stable across sign-outs and machines.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{AuthChangeEvent, Session, User};
use crate::ports::{AuthListener, AuthListeners, AuthSubscription, IdentityProvider, SignInFlow};

use super::session_file::SessionFile;

pub const LOCAL_PROVIDER: &str = "local";

/// Stable user id for an email address
pub fn local_user_id(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("mailto:{}", normalized).as_bytes()).to_string()
}

pub struct LocalIdentity {
    email: String,
    store: SessionFile,
    listeners: AuthListeners,
}

impl LocalIdentity {
    pub fn new(smartmark_dir: &Path, email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            store: SessionFile::new(smartmark_dir, LOCAL_PROVIDER),
            listeners: AuthListeners::new(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    fn name(&self) -> &str {
        LOCAL_PROVIDER
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        self.store.load()
    }

    fn on_auth_state_change(&self, listener: AuthListener) -> AuthSubscription {
        self.listeners.register(listener)
    }

    async fn sign_in_with_provider(&self, _provider: &str, _redirect_to: &str) -> Result<SignInFlow> {
        if self.email.trim().is_empty() {
            return Err(Error::Config("No local email configured".to_string()));
        }

        let email = self.email.trim().to_string();
        let session = Session {
            user: User::new(local_user_id(&email), email),
            access_token: Uuid::new_v4().to_string(),
            refresh_token: None,
            expires_at: None,
        };
        self.store.save(&session)?;
        info!(user_id = session.user_id(), "Signed in locally");

        self.listeners.emit(AuthChangeEvent::SignedIn, Some(&session));
        Ok(SignInFlow::Completed(session))
    }

    async fn complete_sign_in(&self, _callback_url: &str) -> Result<Session> {
        Err(Error::auth("The local provider does not use a redirect"))
    }

    async fn sign_out(&self) -> Result<()> {
        self.store.clear()?;
        self.listeners.emit(AuthChangeEvent::SignedOut, None);
        Ok(())
    }
}
