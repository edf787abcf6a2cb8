//! Smartmark Core - business logic for a personal bookmark manager
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core entities (Bookmark, Session, User)
//! - **ports**: Trait definitions for the hosted platform (identity, storage, change feed)
//! - **services**: Session gate, bookmark list store, change feed adapter
//! - **adapters**: Concrete implementations (DuckDB, Supabase Auth and REST)

pub mod domain;
pub mod ports;
pub mod services;
pub mod adapters;
pub mod config;
pub mod migrations;
pub mod log_migrations;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use adapters::{DuckDbBackend, LocalIdentity, SupabaseAuth, SupabaseRealtime, SupabaseStorage};
use config::{Backend, Config};
use ports::{BookmarkStorage, ChangeFeed, IdentityProvider};
use services::{BookmarkSession, SessionGate};

// Re-export commonly used types at crate root
pub use domain::{AuthChangeEvent, Bookmark, NewBookmark, Session, User};
pub use domain::result::{Error, OperationResult};
pub use services::{LogEntry, LogEvent, LogStats, LoggingService};

/// Local bookmarks database file name
pub const LOCAL_DB_FILE: &str = "bookmarks.duckdb";

/// Main context for Smartmark operations
///
/// Wires the configured backend's adapters to the ports the services use.
pub struct SmartmarkContext {
    pub config: Config,
    pub identity: Arc<dyn IdentityProvider>,
    pub storage: Arc<dyn BookmarkStorage>,
    /// `None` when the backend offers no live updates
    pub change_feed: Option<Arc<dyn ChangeFeed>>,
}

impl SmartmarkContext {
    /// Create a context from the settings in `smartmark_dir`
    pub fn new(smartmark_dir: &Path) -> Result<Self> {
        let config = Config::load(smartmark_dir)?;
        Self::with_config(smartmark_dir, config)
    }

    pub fn with_config(smartmark_dir: &Path, config: Config) -> Result<Self> {
        std::fs::create_dir_all(smartmark_dir)?;

        match config.backend {
            Backend::Local => {
                let backend = Arc::new(DuckDbBackend::open(&smartmark_dir.join(LOCAL_DB_FILE))?);
                let identity = Arc::new(LocalIdentity::new(
                    smartmark_dir,
                    config.local_email.clone().unwrap_or_default(),
                ));

                Ok(Self {
                    config,
                    identity,
                    storage: Arc::clone(&backend) as Arc<dyn BookmarkStorage>,
                    change_feed: Some(backend as Arc<dyn ChangeFeed>),
                })
            }
            Backend::Supabase => {
                let supabase = config.supabase()?;
                let auth = Arc::new(SupabaseAuth::new(&supabase.url, &supabase.anon_key, smartmark_dir)?);
                let storage = Arc::new(SupabaseStorage::new(Arc::clone(&auth), &supabase.anon_key)?);
                let identity: Arc<dyn IdentityProvider> = auth;
                let realtime = SupabaseRealtime::new(&supabase.url, &supabase.anon_key, Arc::clone(&identity))?;

                Ok(Self {
                    config,
                    identity,
                    storage,
                    change_feed: Some(Arc::new(realtime)),
                })
            }
        }
    }

    pub fn backend(&self) -> Backend {
        self.config.backend
    }

    /// Resolve the current session and follow auth changes
    pub async fn open_gate(&self) -> SessionGate {
        SessionGate::open(Arc::clone(&self.identity)).await
    }

    /// Load the list for `session` and subscribe to live changes if available
    pub async fn start_session(&self, session: &Session) -> BookmarkSession {
        BookmarkSession::start(Arc::clone(&self.storage), self.change_feed.clone(), session).await
    }
}
