//! Core domain entities
//!
//! Pure data structures with validation logic - no I/O.

mod bookmark;
pub mod result;
mod session;
mod user;

pub use bookmark::{Bookmark, NewBookmark, REQUIRED_FIELDS_MESSAGE};
pub use session::{AuthChangeEvent, Session};
pub use user::User;
