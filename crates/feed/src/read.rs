/// Per-item, per-user read state
/// Absence of a mark IS the unread signal, so nothing happens on insert;
/// marks are garbage-collected with their item and re-keyed when an
/// optimistic item is confirmed.
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{FeedItem, ItemKey, UserId};

#[derive(Debug, Clone, Default)]
pub struct ReadTracker {
    marks: HashMap<ItemKey, HashMap<UserId, DateTime<Utc>>>,
}

impl ReadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a user has seen an item. Idempotent; re-marking moves
    /// `read_at` forward to the latest call. The session only calls this
    /// for items the store currently holds.
    pub fn mark_read(&mut self, key: ItemKey, user_id: UserId, at: DateTime<Utc>) {
        self.marks.entry(key).or_default().insert(user_id, at);
    }

    pub fn read_at(&self, key: &ItemKey, user_id: UserId) -> Option<DateTime<Utc>> {
        self.marks
            .get(key)
            .and_then(|users| users.get(&user_id).copied())
    }

    pub fn is_read(&self, key: &ItemKey, user_id: UserId) -> bool {
        self.read_at(key, user_id).is_some()
    }

    /// Count items in the given snapshot with no mark for the user.
    pub fn unread_count(&self, user_id: UserId, snapshot: &[FeedItem]) -> usize {
        snapshot
            .iter()
            .filter(|item| match item.key() {
                Some(key) => !self.is_read(&key, user_id),
                None => true,
            })
            .count()
    }

    /// Garbage-collect marks for a removed item.
    pub fn forget(&mut self, key: &ItemKey) {
        self.marks.remove(key);
    }

    /// Move marks from an optimistic key to its confirmed key so read
    /// state survives reconciliation.
    pub fn rekey(&mut self, from: &ItemKey, to: ItemKey) {
        if let Some(marks) = self.marks.remove(from) {
            self.marks.entry(to).or_default().extend(marks);
        }
    }
}
