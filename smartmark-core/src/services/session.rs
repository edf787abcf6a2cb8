//! Session gate - who is signed in right now
//!
//! Reads the session once at startup and then follows every auth state change
//! reported by the identity provider. Retrieval errors never reach callers:
//! they are logged and treated exactly like "nobody is signed in".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::domain::result::Result;
use crate::domain::Session;
use crate::ports::{AuthSubscription, IdentityProvider, SignInFlow};

/// Fetch the current session, collapsing any error to `None`
pub async fn get_initial_session(identity: &dyn IdentityProvider) -> Option<Session> {
    match identity.get_session().await {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, provider = identity.name(), "Error getting session");
            None
        }
    }
}

/// Register `on_change` for every future session change.
///
/// The returned handle stops delivery when unsubscribed or dropped.
pub fn subscribe_to_session_changes<F>(identity: &dyn IdentityProvider, on_change: F) -> AuthSubscription
where
    F: Fn(Option<Session>) + Send + Sync + 'static,
{
    identity.on_auth_state_change(Arc::new(move |event, session| {
        debug!(%event, "Auth state changed");
        on_change(session.cloned());
    }))
}

/// Tracks the current session for the lifetime of a front end
pub struct SessionGate {
    identity: Arc<dyn IdentityProvider>,
    current: Arc<watch::Sender<Option<Session>>>,
    subscription: Option<AuthSubscription>,
}

impl SessionGate {
    /// Subscribe to changes, then resolve the initial session.
    ///
    /// A change delivered while the initial fetch is in flight is newer than
    /// the fetch result, so the fetch result is discarded in that case.
    pub async fn open(identity: Arc<dyn IdentityProvider>) -> Self {
        let (sender, _) = watch::channel(None);
        let current = Arc::new(sender);
        let changed_early = Arc::new(AtomicBool::new(false));

        let subscription = {
            let current = Arc::clone(&current);
            let changed_early = Arc::clone(&changed_early);
            subscribe_to_session_changes(identity.as_ref(), move |session| {
                changed_early.store(true, Ordering::SeqCst);
                current.send_replace(session);
            })
        };

        let initial = get_initial_session(identity.as_ref()).await;
        if !changed_early.load(Ordering::SeqCst) {
            current.send_replace(initial);
        }

        Self {
            identity,
            current,
            subscription: Some(subscription),
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.current.borrow().is_some()
    }

    pub fn user_id(&self) -> Option<String> {
        self.current.borrow().as_ref().map(|s| s.user_id().to_string())
    }

    /// Watch handle that sees every session replacement
    pub fn changes(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }

    pub fn provider_name(&self) -> &str {
        self.identity.name()
    }

    pub async fn sign_in(&self, provider: &str, redirect_to: &str) -> Result<SignInFlow> {
        self.identity
            .sign_in_with_provider(provider, redirect_to)
            .await
            .inspect_err(|e| error!(error = %e, provider, "Error starting sign-in"))
    }

    pub async fn complete_sign_in(&self, callback_url: &str) -> Result<Session> {
        self.identity
            .complete_sign_in(callback_url)
            .await
            .inspect_err(|e| error!(error = %e, "Error completing sign-in"))
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.identity
            .sign_out()
            .await
            .inspect_err(|e| error!(error = %e, "Error signing out"))
    }

    /// Stop following auth changes. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

impl Drop for SessionGate {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::domain::result::Error;
    use crate::domain::{AuthChangeEvent, User};
    use crate::ports::{AuthListener, AuthListeners};

    fn session(user_id: &str) -> Session {
        Session {
            user: User::new(user_id, format!("{}@example.com", user_id)),
            access_token: "token".to_string(),
            refresh_token: None,
            expires_at: None,
        }
    }

    #[derive(Default)]
    struct FakeIdentity {
        session: Mutex<Option<Session>>,
        fail_get: bool,
        /// Sign out from inside get_session, before the stale value returns
        race_sign_out: bool,
        listeners: AuthListeners,
    }

    impl FakeIdentity {
        fn signed_in(user_id: &str) -> Self {
            Self {
                session: Mutex::new(Some(session(user_id))),
                ..Default::default()
            }
        }

        fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
            *self.session.lock().unwrap() = session.clone();
            self.listeners.emit(event, session.as_ref());
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeIdentity {
        fn name(&self) -> &str {
            "fake"
        }

        async fn get_session(&self) -> Result<Option<Session>> {
            if self.fail_get {
                return Err(Error::auth("invalid refresh token"));
            }
            let stale = self.session.lock().unwrap().clone();
            if self.race_sign_out {
                self.emit(AuthChangeEvent::SignedOut, None);
            }
            Ok(stale)
        }

        fn on_auth_state_change(&self, listener: AuthListener) -> AuthSubscription {
            self.listeners.register(listener)
        }

        async fn sign_in_with_provider(&self, _provider: &str, _redirect_to: &str) -> Result<SignInFlow> {
            let s = session("user-1");
            self.emit(AuthChangeEvent::SignedIn, Some(s.clone()));
            Ok(SignInFlow::Completed(s))
        }

        async fn complete_sign_in(&self, _callback_url: &str) -> Result<Session> {
            Err(Error::auth("not a redirect provider"))
        }

        async fn sign_out(&self) -> Result<()> {
            self.emit(AuthChangeEvent::SignedOut, None);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initial_session_error_collapses_to_none() {
        let identity = FakeIdentity {
            fail_get: true,
            ..Default::default()
        };
        assert!(get_initial_session(&identity).await.is_none());

        let gate = SessionGate::open(Arc::new(identity)).await;
        assert!(!gate.is_signed_in());
        assert!(gate.user_id().is_none());
    }

    #[tokio::test]
    async fn test_gate_resolves_initial_session() {
        let gate = SessionGate::open(Arc::new(FakeIdentity::signed_in("user-1"))).await;
        assert!(gate.is_signed_in());
        assert_eq!(gate.user_id().as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_gate_follows_changes() {
        let identity = Arc::new(FakeIdentity::default());
        let gate = SessionGate::open(identity.clone()).await;
        let mut changes = gate.changes();
        assert!(!gate.is_signed_in());

        gate.sign_in("google", "http://localhost:3000").await.unwrap();
        assert!(changes.has_changed().unwrap());
        assert_eq!(gate.user_id().as_deref(), Some("user-1"));

        identity.emit(AuthChangeEvent::TokenRefreshed, Some(session("user-1")));
        assert!(gate.is_signed_in());

        gate.sign_out().await.unwrap();
        assert!(!gate.is_signed_in());
        assert!(changes.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn test_change_during_initial_fetch_wins() {
        let identity = FakeIdentity {
            session: Mutex::new(Some(session("user-1"))),
            race_sign_out: true,
            ..Default::default()
        };
        let gate = SessionGate::open(Arc::new(identity)).await;
        assert!(!gate.is_signed_in());
    }

    #[tokio::test]
    async fn test_close_stops_delivery() {
        let identity = Arc::new(FakeIdentity::signed_in("user-1"));
        let mut gate = SessionGate::open(identity.clone()).await;

        gate.close();
        gate.close();
        assert!(identity.listeners.is_empty());

        identity.emit(AuthChangeEvent::SignedOut, None);
        assert_eq!(gate.user_id().as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_subscription_outlives_nothing() {
        let identity = FakeIdentity::default();
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut sub = {
            let received = Arc::clone(&received);
            subscribe_to_session_changes(&identity, move |s| {
                received.lock().unwrap().push(s.map(|s| s.user.id));
            })
        };

        identity.emit(AuthChangeEvent::SignedIn, Some(session("user-2")));
        sub.unsubscribe();
        identity.emit(AuthChangeEvent::SignedOut, None);
        drop(identity);
        sub.unsubscribe();

        assert_eq!(*received.lock().unwrap(), vec![Some("user-2".to_string())]);
    }
}
