//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for BookmarkStorage and ChangeFeed (local backend)
//! - Local session file for IdentityProvider (local backend)
//! - Supabase Auth (GoTrue) over HTTP for IdentityProvider
//! - Supabase REST (PostgREST) over HTTP for BookmarkStorage
//! - Supabase Realtime over a websocket for ChangeFeed

pub mod duckdb;
pub mod gotrue;
pub mod local_identity;
pub mod postgrest;
pub mod realtime;
pub mod session_file;

#[cfg(test)]
pub mod realtime_mock;
#[cfg(test)]
pub mod supabase_mock;

pub use self::duckdb::DuckDbBackend;
pub use gotrue::SupabaseAuth;
pub use local_identity::LocalIdentity;
pub use postgrest::SupabaseStorage;
pub use realtime::SupabaseRealtime;
pub use session_file::SessionFile;
