/// Realtime collaborative feed synchronization core.
/// Merges server-pushed events and optimistic local submissions into one
/// canonical ordered feed with read tracking and presence.
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod item;
pub use item::*;

mod ordering;
pub use ordering::*;

mod store;
pub use store::*;

mod read;
pub use read::*;

mod submit;
pub use submit::*;

mod presence;
pub use presence::*;

mod protocol;
pub use protocol::*;

mod session;
pub use session::*;

mod client;
pub use client::*;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("network error: {0}")]
    NetworkError(String),

    #[error("feed not found: {0}")]
    FeedNotFound(String),

    #[error("unknown submission: {0}")]
    UnknownSubmission(String),
}

pub type Result<T> = std::result::Result<T, FeedError>;

/// User identifier within a shared feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub uuid::Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed (room) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedId(pub uuid::Uuid);

impl FeedId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for FeedId {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-generated identifier for an optimistic item awaiting confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TempId(pub uuid::Uuid);

impl TempId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-assigned canonical item identifier, opaque to the client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}
