/// Canonical feed item collection
/// Applies inserts/updates/deletes from remote events and local optimistic
/// submissions, reconciles optimistic items against server confirmations,
/// and exposes a memoized ordered snapshot. Event delivery is
/// at-least-once; idempotent merge makes processing effectively-once.
use std::collections::{HashMap, VecDeque};

use chrono::Duration;
use tracing::{debug, warn};

use crate::{
    order_key, EventOp, FeedItem, ItemId, ItemKey, ItemState, Payload, RemoteEvent, TempId, UserId,
};

/// How many confirmed tempId -> server id mappings are retained to
/// suppress duplicate remote echoes after the optimistic item is gone.
const ECHO_RETENTION: usize = 64;

/// Maximum clock skew between a local submission and its server echo for
/// the author/content heuristic match.
const ECHO_SKEW_SECONDS: i64 = 30;

/// Change reported by a store mutation. The session routes these to the
/// read tracker and submission queue; the rendering layer can consume
/// them to invalidate views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Inserted(ItemKey),
    Updated(ItemKey),
    Removed(ItemKey),
    /// An optimistic item was replaced by its server-confirmed counterpart
    Reconciled { temp_id: TempId, id: ItemId },
}

#[derive(Debug, Default)]
pub struct FeedStore {
    items: HashMap<ItemKey, FeedItem>,
    /// Ordered view cache, rebuilt when dirty
    view: Vec<FeedItem>,
    dirty: bool,
    /// Recently confirmed tempId -> server id mappings, insertion order
    echoes: HashMap<TempId, ItemId>,
    echo_order: VecDeque<TempId>,
    /// Malformed events dropped since construction
    dropped_events: u64,
}

impl FeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.items.contains_key(key)
    }

    pub fn get(&self, key: &ItemKey) -> Option<&FeedItem> {
        self.items.get(key)
    }

    /// Malformed events dropped so far
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    /// Ordered read-only view, earliest first. Recomputed only when the
    /// underlying set has changed since the last call.
    pub fn snapshot(&mut self) -> &[FeedItem] {
        if self.dirty {
            let mut view: Vec<FeedItem> = self.items.values().cloned().collect();
            view.sort_by_key(order_key);
            self.view = view;
            self.dirty = false;
        }
        &self.view
    }

    /// Create a PENDING item for a local submission at the synthetic tail
    /// position and return its temp id for the submission queue to track.
    pub fn submit_local(&mut self, author_id: UserId, payload: Payload) -> TempId {
        let temp_id = TempId::new();
        let item = FeedItem::pending(temp_id, author_id, payload);
        self.items.insert(ItemKey::Local(temp_id), item);
        self.dirty = true;
        debug!(temp_id = %temp_id.0, "optimistic item inserted");
        temp_id
    }

    /// Apply a server-pushed event. Never fails outward: malformed events
    /// are dropped and counted, duplicate delivery is absorbed by the
    /// idempotent merge, deleting an unknown id is a no-op.
    pub fn apply_remote_event(&mut self, event: RemoteEvent) -> Vec<StoreChange> {
        let RemoteEvent { op, item } = event;

        let Some(id) = item.id.clone() else {
            self.drop_event("event item missing server id");
            return Vec::new();
        };

        match op {
            EventOp::Delete => self.remove(&ItemKey::Server(id)),
            EventOp::Insert | EventOp::Update => {
                if item.sequence.is_none() {
                    self.drop_event("confirmed item missing sequence");
                    return Vec::new();
                }
                self.upsert_confirmed(id, item)
            }
        }
    }

    /// Replace a pending submission with the server-confirmed item.
    ///
    /// A confirmation referencing an unknown temp id inserts the item as
    /// a new canonical entry: the server is authoritative.
    pub fn reconcile_submission(
        &mut self,
        temp_id: TempId,
        server_item: FeedItem,
    ) -> Vec<StoreChange> {
        let Some(id) = server_item.id.clone() else {
            self.drop_event("confirmation missing server id");
            return Vec::new();
        };
        if server_item.sequence.is_none() {
            self.drop_event("confirmation missing sequence");
            return Vec::new();
        }

        let mut item = server_item;
        item.state = ItemState::Confirmed;
        if self.items.contains_key(&ItemKey::Local(temp_id)) {
            self.replace_pending(temp_id, id, item)
        } else {
            self.upsert_confirmed(id, item)
        }
    }

    /// Transition a pending item to FAILED. The item stays visible until
    /// explicitly removed so the user can retry or dismiss it.
    pub fn mark_failed(&mut self, temp_id: TempId) -> Vec<StoreChange> {
        let key = ItemKey::Local(temp_id);
        match self.items.get_mut(&key) {
            Some(item) if item.state != ItemState::Failed => {
                item.state = ItemState::Failed;
                self.dirty = true;
                vec![StoreChange::Updated(key)]
            }
            _ => Vec::new(),
        }
    }

    /// Remove an item. Read-mark garbage collection is routed by the
    /// session from the returned change.
    pub fn remove(&mut self, key: &ItemKey) -> Vec<StoreChange> {
        if self.items.remove(key).is_some() {
            self.dirty = true;
            vec![StoreChange::Removed(key.clone())]
        } else {
            Vec::new()
        }
    }

    fn upsert_confirmed(&mut self, id: ItemId, mut item: FeedItem) -> Vec<StoreChange> {
        item.state = ItemState::Confirmed;
        let key = ItemKey::Server(id.clone());

        // Existing confirmed item: insert is treated as update.
        if self.items.contains_key(&key) {
            self.items.insert(key.clone(), item);
            self.dirty = true;
            return vec![StoreChange::Updated(key)];
        }

        // Late echo of an already reconciled (and possibly since removed)
        // submission: suppress rather than resurrect.
        if let Some(temp_id) = item.temp_id {
            if self.echoes.get(&temp_id) == Some(&id) {
                debug!(temp_id = %temp_id.0, "suppressed duplicate echo");
                return Vec::new();
            }
        }

        // Match against a pending optimistic item: echoed temp id first,
        // then the author/content/skew heuristic.
        if let Some(temp_id) = self.match_pending(&item) {
            return self.replace_pending(temp_id, id, item);
        }

        self.items.insert(key.clone(), item);
        self.dirty = true;
        vec![StoreChange::Inserted(key)]
    }

    fn match_pending(&self, incoming: &FeedItem) -> Option<TempId> {
        if let Some(temp_id) = incoming.temp_id {
            if self.items.contains_key(&ItemKey::Local(temp_id)) {
                return Some(temp_id);
            }
        }

        let hash = incoming.payload.content_hash();
        let skew = Duration::seconds(ECHO_SKEW_SECONDS);
        self.items.iter().find_map(|(key, held)| match key {
            ItemKey::Local(temp_id)
                if held.state == ItemState::Pending
                    && held.author_id == incoming.author_id
                    && held.payload.content_hash() == hash
                    && (held.created_at - incoming.created_at).abs() <= skew =>
            {
                Some(*temp_id)
            }
            _ => None,
        })
    }

    fn replace_pending(
        &mut self,
        temp_id: TempId,
        id: ItemId,
        mut item: FeedItem,
    ) -> Vec<StoreChange> {
        self.items.remove(&ItemKey::Local(temp_id));
        item.temp_id = Some(temp_id);
        self.items.insert(ItemKey::Server(id.clone()), item);
        self.remember_echo(temp_id, id.clone());
        self.dirty = true;
        debug!(temp_id = %temp_id.0, id = %id.0, "optimistic item reconciled");
        vec![StoreChange::Reconciled { temp_id, id }]
    }

    fn remember_echo(&mut self, temp_id: TempId, id: ItemId) {
        if self.echoes.insert(temp_id, id).is_none() {
            self.echo_order.push_back(temp_id);
            if self.echo_order.len() > ECHO_RETENTION {
                if let Some(evicted) = self.echo_order.pop_front() {
                    self.echoes.remove(&evicted);
                }
            }
        }
    }

    fn drop_event(&mut self, reason: &str) {
        self.dropped_events += 1;
        warn!(reason, "dropped malformed feed event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed(id: &str, sequence: u64, author: UserId, text: &str) -> FeedItem {
        FeedItem::confirmed(ItemId::new(id), sequence, author, Payload::text(text))
    }

    #[test]
    fn test_submit_local_appends_pending() {
        let mut store = FeedStore::new();
        let author = UserId::new();

        let temp_id = store.submit_local(author, Payload::text("hello"));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, ItemState::Pending);
        assert_eq!(snapshot[0].temp_id, Some(temp_id));
    }

    #[test]
    fn test_duplicate_insert_is_idempotent() {
        let mut store = FeedStore::new();
        let author = UserId::new();
        let event = RemoteEvent::insert(confirmed("s2", 1, author, "dup"));

        store.apply_remote_event(event.clone());
        let first: Vec<FeedItem> = store.snapshot().to_vec();

        store.apply_remote_event(event);
        assert_eq!(store.snapshot(), first.as_slice());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_unknown_is_noop() {
        let mut store = FeedStore::new();
        let author = UserId::new();

        let changes =
            store.apply_remote_event(RemoteEvent::delete(confirmed("ghost", 1, author, "x")));

        assert!(changes.is_empty());
        assert_eq!(store.dropped_events(), 0);
    }

    #[test]
    fn test_malformed_event_dropped_not_thrown() {
        let mut store = FeedStore::new();
        let author = UserId::new();
        let mut item = confirmed("s1", 1, author, "x");
        item.id = None;

        let changes = store.apply_remote_event(RemoteEvent::insert(item));

        assert!(changes.is_empty());
        assert!(store.is_empty());
        assert_eq!(store.dropped_events(), 1);
    }

    #[test]
    fn test_confirmed_without_sequence_dropped() {
        let mut store = FeedStore::new();
        let author = UserId::new();
        let mut item = confirmed("s1", 1, author, "x");
        item.sequence = None;

        store.apply_remote_event(RemoteEvent::insert(item));

        assert!(store.is_empty());
        assert_eq!(store.dropped_events(), 1);
    }

    #[test]
    fn test_echoed_temp_id_reconciles_in_place() {
        let mut store = FeedStore::new();
        let author = UserId::new();
        let temp_id = store.submit_local(author, Payload::text("hello"));

        let server_item = confirmed("s1", 10, author, "hello").with_temp_id(temp_id);
        let changes = store.apply_remote_event(RemoteEvent::insert(server_item));

        assert_eq!(
            changes,
            vec![StoreChange::Reconciled {
                temp_id,
                id: ItemId::new("s1")
            }]
        );
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, Some(ItemId::new("s1")));
        assert_eq!(snapshot[0].state, ItemState::Confirmed);
    }

    #[test]
    fn test_heuristic_match_without_temp_id() {
        let mut store = FeedStore::new();
        let author = UserId::new();
        store.submit_local(author, Payload::text("same words"));

        // No temp id on the echo; author + content + close timestamps.
        let server_item = confirmed("s1", 10, author, "same words");
        store.apply_remote_event(RemoteEvent::insert(server_item));

        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot()[0].id, Some(ItemId::new("s1")));
    }

    #[test]
    fn test_no_heuristic_match_for_other_author() {
        let mut store = FeedStore::new();
        let author = UserId::new();
        store.submit_local(author, Payload::text("same words"));

        let server_item = confirmed("s1", 10, UserId::new(), "same words");
        store.apply_remote_event(RemoteEvent::insert(server_item));

        // Different author: genuinely new item alongside the pending one.
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_late_echo_after_removal_is_suppressed() {
        let mut store = FeedStore::new();
        let author = UserId::new();
        let temp_id = store.submit_local(author, Payload::text("hello"));

        let server_item = confirmed("s1", 10, author, "hello").with_temp_id(temp_id);
        store.apply_remote_event(RemoteEvent::insert(server_item.clone()));
        store.remove(&ItemKey::Server(ItemId::new("s1")));

        // The transport redelivers the echo after the user deleted the item.
        let changes = store.apply_remote_event(RemoteEvent::insert(server_item));

        assert!(changes.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_confirmation_reorders_into_place() {
        let mut store = FeedStore::new();
        let author = UserId::new();
        store.apply_remote_event(RemoteEvent::insert(confirmed("s1", 10, author, "first")));
        store.apply_remote_event(RemoteEvent::insert(confirmed("s3", 30, author, "third")));

        let temp_id = store.submit_local(author, Payload::text("second"));
        {
            let snapshot = store.snapshot();
            assert_eq!(snapshot[2].temp_id, Some(temp_id));
        }

        // Confirmation lands between the two confirmed items.
        let server_item = confirmed("s2", 20, author, "second").with_temp_id(temp_id);
        store.reconcile_submission(temp_id, server_item);

        let ids: Vec<_> = store
            .snapshot()
            .iter()
            .map(|item| item.id.clone().unwrap().0)
            .collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn test_snapshot_stable_without_mutation() {
        let mut store = FeedStore::new();
        let author = UserId::new();
        store.apply_remote_event(RemoteEvent::insert(confirmed("s1", 1, author, "a")));

        let first: Vec<FeedItem> = store.snapshot().to_vec();
        let second: Vec<FeedItem> = store.snapshot().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn test_mark_failed_keeps_item_visible() {
        let mut store = FeedStore::new();
        let author = UserId::new();
        let temp_id = store.submit_local(author, Payload::text("doomed"));

        store.mark_failed(temp_id);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, ItemState::Failed);
    }
}
