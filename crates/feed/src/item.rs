/// Feed item model
/// Content is opaque to the synchronization core; only identity, ordering
/// and lifecycle state matter here.
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ItemId, TempId, UserId};

/// Opaque item content: a type tag plus structured fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub kind: String,
    pub body: serde_json::Value,
}

impl Payload {
    pub fn new(kind: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            body,
        }
    }

    /// Plain text entry, the common case for progress notes
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            body: serde_json::json!({ "text": text.into() }),
        }
    }

    /// In-memory hash of the serialized content. Feeds the reconciliation
    /// heuristic when the server does not echo a temp id back; never
    /// persisted or sent on the wire.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.kind.hash(&mut hasher);
        self.body.to_string().hash(&mut hasher);
        hasher.finish()
    }
}

/// Lifecycle state of a feed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Submitted locally, awaiting server confirmation
    Pending,
    /// Server acknowledged, canonical
    Confirmed,
    /// Server rejected the submission or retries were exhausted
    Failed,
}

/// A single entry in a collaborative feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Server-assigned id, present once confirmed
    pub id: Option<ItemId>,

    /// Client-generated id; set on optimistic items and echoed back by
    /// the server on confirmation
    pub temp_id: Option<TempId>,

    /// Server-assigned position in the feed's total order
    pub sequence: Option<u64>,

    pub author_id: UserId,

    pub payload: Payload,

    /// Client-assigned for optimistic items, server-assigned once confirmed
    pub created_at: DateTime<Utc>,

    pub state: ItemState,
}

impl FeedItem {
    /// An optimistic item for a local submission
    pub fn pending(temp_id: TempId, author_id: UserId, payload: Payload) -> Self {
        Self {
            id: None,
            temp_id: Some(temp_id),
            sequence: None,
            author_id,
            payload,
            created_at: Utc::now(),
            state: ItemState::Pending,
        }
    }

    /// A confirmed item as the server emits it
    pub fn confirmed(id: ItemId, sequence: u64, author_id: UserId, payload: Payload) -> Self {
        Self {
            id: Some(id),
            temp_id: None,
            sequence: Some(sequence),
            author_id,
            payload,
            created_at: Utc::now(),
            state: ItemState::Confirmed,
        }
    }

    pub fn with_temp_id(mut self, temp_id: TempId) -> Self {
        self.temp_id = Some(temp_id);
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Key under which the store addresses this item: the server id once
    /// one exists, the temp id before.
    pub fn key(&self) -> Option<ItemKey> {
        match (&self.id, self.temp_id) {
            (Some(id), _) => Some(ItemKey::Server(id.clone())),
            (None, Some(temp_id)) => Some(ItemKey::Local(temp_id)),
            (None, None) => None,
        }
    }
}

/// Store-internal address of an item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKey {
    Server(ItemId),
    Local(TempId),
}
