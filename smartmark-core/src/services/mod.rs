//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

pub mod bookmarks;
pub mod feed;
pub mod logging;
pub mod migration;
pub mod session;
mod workspace;

pub use bookmarks::{
    BookmarkDraft, BookmarkStore, StorePhase, StoreSnapshot, ADD_FAILED_MESSAGE,
    DELETE_FAILED_MESSAGE, LOAD_FAILED_MESSAGE,
};
pub use feed::{FeedEvent, FeedHandler, FeedSubscription, CHANNEL_NAME};
pub use logging::{LogEntry, LogEvent, LogStats, LoggingService, LOG_DB_FILE};
pub use migration::{MigrationResult, MigrationService, MigrationSet};
pub use session::{get_initial_session, subscribe_to_session_changes, SessionGate};
pub use workspace::BookmarkSession;
