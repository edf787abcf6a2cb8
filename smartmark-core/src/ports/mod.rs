//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for the hosted platform the app sits on:
//! identity, storage, and the realtime change feed. Services depend only on
//! these traits.

mod change_feed;
mod identity;
mod storage;

pub use change_feed::{
    ChangeFeed, ChangeKind, ChangePayload, Channel, ChannelBinding, ChannelSink, ChannelStatus,
};
pub use identity::{AuthListener, AuthListeners, AuthSubscription, IdentityProvider, SignInFlow};
pub use storage::{BookmarkStorage, BOOKMARKS_TABLE};
