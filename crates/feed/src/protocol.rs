/// Wire messages exchanged between a feed client and the feed server
use serde::{Deserialize, Serialize};

use crate::{FeedId, FeedItem, Payload, PresenceEntry, PresenceUpdate, TempId, UserId};

/// Mutation carried by a server-pushed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOp {
    Insert,
    Update,
    Delete,
}

/// A server-pushed feed mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub op: EventOp,
    pub item: FeedItem,
}

impl RemoteEvent {
    pub fn insert(item: FeedItem) -> Self {
        Self {
            op: EventOp::Insert,
            item,
        }
    }

    pub fn update(item: FeedItem) -> Self {
        Self {
            op: EventOp::Update,
            item,
        }
    }

    pub fn delete(item: FeedItem) -> Self {
        Self {
            op: EventOp::Delete,
            item,
        }
    }
}

/// Message types exchanged between client and server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FeedMessage {
    // Connection management
    #[serde(rename = "connect")]
    Connect {
        feed_id: FeedId,
        user_id: UserId,
        display_name: String,
    },

    #[serde(rename = "connected")]
    Connected {
        feed_id: FeedId,
        user_id: UserId,
        items: Vec<FeedItem>,
        presence: Vec<PresenceEntry>,
    },

    // Submission round trip
    #[serde(rename = "submit")]
    Submit {
        temp_id: TempId,
        author_id: UserId,
        payload: Payload,
    },

    #[serde(rename = "confirmed")]
    Confirmed { item: FeedItem },

    #[serde(rename = "rejected")]
    Rejected { temp_id: TempId, reason: String },

    // Feed synchronization
    #[serde(rename = "event")]
    Event { event: RemoteEvent },

    #[serde(rename = "sync_request")]
    SyncRequest { since: Option<u64> },

    #[serde(rename = "sync_response")]
    SyncResponse { items: Vec<FeedItem> },

    // Presence updates
    #[serde(rename = "presence")]
    Presence { update: PresenceUpdate },

    // Error handling
    #[serde(rename = "error")]
    Error { message: String },

    // Heartbeat
    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "pong")]
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ItemId;

    #[test]
    fn test_message_round_trip() {
        let item = FeedItem::confirmed(ItemId::new("s1"), 7, UserId::new(), Payload::text("hi"));
        let msg = FeedMessage::Event {
            event: RemoteEvent::insert(item),
        };

        let json = serde_json::to_string(&msg).unwrap();
        let back: FeedMessage = serde_json::from_str(&json).unwrap();

        match back {
            FeedMessage::Event { event } => {
                assert_eq!(event.op, EventOp::Insert);
                assert_eq!(event.item.id, Some(ItemId::new("s1")));
                assert_eq!(event.item.sequence, Some(7));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_messages_are_type_tagged() {
        let json = serde_json::to_string(&FeedMessage::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);

        let msg = FeedMessage::SyncRequest { since: Some(42) };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"sync_request""#));
        assert!(json.contains(r#""since":42"#));
    }
}
