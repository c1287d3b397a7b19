/// Total order for feed items
/// Confirmed items sort by server sequence, earliest first. Optimistic
/// items have no sequence yet and always sort after every confirmed item,
/// by local creation time, tie-broken by temp id.
use chrono::{DateTime, Utc};

use crate::{FeedItem, ItemState, TempId};

/// Ordering key for a feed item.
///
/// Variant order carries the banding: any `Confirmed` key compares less
/// than any `Local` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrderKey {
    /// Server-assigned position
    Confirmed(u64),
    /// Synthetic tail position for items without a sequence
    Local(DateTime<Utc>, TempId),
}

/// Derive the ordering key for an item.
///
/// A pending item's key changes once it is confirmed; the store re-sorts
/// at that point, which is the one-time visible reorder.
pub fn order_key(item: &FeedItem) -> OrderKey {
    match (item.state, item.sequence) {
        (ItemState::Confirmed, Some(sequence)) => OrderKey::Confirmed(sequence),
        _ => OrderKey::Local(
            item.created_at,
            item.temp_id.unwrap_or(TempId(uuid::Uuid::nil())),
        ),
    }
}
