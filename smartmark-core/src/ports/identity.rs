//! Identity provider port - authentication and session issuance

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use url::Url;

use crate::domain::result::Result;
use crate::domain::{AuthChangeEvent, Session};

/// Callback invoked on every authentication state change.
///
/// Receives the new session, or `None` after sign-out.
pub type AuthListener = Arc<dyn Fn(AuthChangeEvent, Option<&Session>) + Send + Sync>;

/// Outcome of starting a sign-in
#[derive(Debug, Clone)]
pub enum SignInFlow {
    /// The user must open this URL; the provider redirects back with tokens
    /// which are handed to [`IdentityProvider::complete_sign_in`].
    Redirect(Url),
    /// Sign-in finished without a round trip
    Completed(Session),
}

/// Identity provider trait
///
/// Implementations own the persisted session and notify listeners registered
/// through `on_auth_state_change` whenever it is replaced or cleared.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name (e.g., "supabase", "local")
    fn name(&self) -> &str;

    /// Current session, or `None` when nobody is signed in
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Register a listener; dropping or unsubscribing the handle stops delivery
    fn on_auth_state_change(&self, listener: AuthListener) -> AuthSubscription;

    /// Start signing in with an external provider (e.g., "google")
    async fn sign_in_with_provider(&self, provider: &str, redirect_to: &str) -> Result<SignInFlow>;

    /// Finish a redirect sign-in from the callback URL the provider returned to
    async fn complete_sign_in(&self, callback_url: &str) -> Result<Session>;

    /// Sign out, clearing the current session
    async fn sign_out(&self) -> Result<()>;
}

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    listeners: BTreeMap<u64, AuthListener>,
}

fn lock(registry: &Mutex<ListenerRegistry>) -> MutexGuard<'_, ListenerRegistry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Listener registry shared by identity adapters
#[derive(Clone, Default)]
pub struct AuthListeners {
    inner: Arc<Mutex<ListenerRegistry>>,
}

impl AuthListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: AuthListener) -> AuthSubscription {
        let mut registry = lock(&self.inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, listener);

        AuthSubscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every registered listener, in registration order.
    ///
    /// The registry lock is not held while a listener runs, so listeners may
    /// unsubscribe themselves or others; a listener removed mid-emit is skipped.
    pub fn emit(&self, event: AuthChangeEvent, session: Option<&Session>) {
        let snapshot: Vec<(u64, AuthListener)> = lock(&self.inner)
            .listeners
            .iter()
            .map(|(id, l)| (*id, Arc::clone(l)))
            .collect();

        for (id, listener) in snapshot {
            if lock(&self.inner).listeners.contains_key(&id) {
                listener(event, session);
            }
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle to a registered auth listener
///
/// `unsubscribe` may be called any number of times, including after the
/// provider itself has been dropped. Dropping the handle unsubscribes.
pub struct AuthSubscription {
    id: u64,
    registry: Weak<Mutex<ListenerRegistry>>,
}

impl AuthSubscription {
    pub fn unsubscribe(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).listeners.remove(&self.id);
        }
        self.registry = Weak::new();
    }

    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .map(|r| lock(&r).listeners.contains_key(&self.id))
            .unwrap_or(false)
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for AuthSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSubscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
