/// Collaborator presence for a shared feed
/// Display-only state, isolated from the store so presence churn never
/// triggers feed re-sorts.
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A collaborator currently connected to a feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PresenceSet {
    members: HashMap<UserId, PresenceEntry>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collaborator. Last write wins on duplicate join.
    pub fn join(&mut self, user_id: UserId, display_name: impl Into<String>) {
        let now = Utc::now();
        self.members.insert(
            user_id,
            PresenceEntry {
                user_id,
                display_name: display_name.into(),
                joined_at: now,
                last_seen: now,
            },
        );
    }

    pub fn leave(&mut self, user_id: UserId) {
        self.members.remove(&user_id);
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.members.contains_key(&user_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Current members, oldest join first for stable display.
    pub fn members(&self) -> Vec<&PresenceEntry> {
        let mut members: Vec<_> = self.members.values().collect();
        members.sort_by_key(|entry| entry.joined_at);
        members
    }

    /// Refresh activity for a member.
    pub fn touch(&mut self, user_id: UserId) {
        if let Some(entry) = self.members.get_mut(&user_id) {
            entry.last_seen = Utc::now();
        }
    }

    /// Drop members with no activity for longer than `max_idle`.
    pub fn sweep_idle(&mut self, max_idle: Duration) {
        let now = Utc::now();
        self.members.retain(|_, entry| now - entry.last_seen <= max_idle);
    }
}

/// Presence change carried on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PresenceUpdate {
    #[serde(rename = "joined")]
    Joined {
        user_id: UserId,
        display_name: String,
    },

    #[serde(rename = "left")]
    Left { user_id: UserId },
}
