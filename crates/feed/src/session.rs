/// Per-feed aggregate owning the canonical items and their derived state
/// All mutation funnels through here so the store's invariants are
/// enforced in one place; the read tracker and submission queue hold only
/// ids into the store and never touch items directly.
use chrono::Utc;
use tracing::debug;

use crate::{
    FeedError, FeedId, FeedItem, FeedStore, ItemKey, Payload, PresenceEntry, PresenceSet,
    PresenceUpdate, ReadTracker, RemoteEvent, Result, RetryPolicy, ScopeToken, SendDisposition,
    SendResult, StoreChange, SubmissionQueue, SubmissionRecord, TempId, UserId,
};

pub struct FeedSession {
    feed_id: FeedId,
    user_id: UserId,
    store: FeedStore,
    reads: ReadTracker,
    submissions: SubmissionQueue,
    presence: PresenceSet,
    scope: ScopeToken,
}

impl FeedSession {
    pub fn new(feed_id: FeedId, user_id: UserId) -> Self {
        Self::with_policy(feed_id, user_id, RetryPolicy::default())
    }

    pub fn with_policy(feed_id: FeedId, user_id: UserId, policy: RetryPolicy) -> Self {
        Self {
            feed_id,
            user_id,
            store: FeedStore::new(),
            reads: ReadTracker::new(),
            submissions: SubmissionQueue::new(policy),
            presence: PresenceSet::new(),
            scope: ScopeToken::new(),
        }
    }

    pub fn feed_id(&self) -> FeedId {
        self.feed_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Scope token shared with every callback scheduled for this feed view.
    pub fn scope(&self) -> ScopeToken {
        self.scope.clone()
    }

    /// Submit new content optimistically. The item is visible immediately
    /// and already read for its author.
    pub fn submit(&mut self, payload: Payload) -> TempId {
        let temp_id = self.store.submit_local(self.user_id, payload);
        self.submissions.enqueue(temp_id);
        self.reads
            .mark_read(ItemKey::Local(temp_id), self.user_id, Utc::now());
        temp_id
    }

    /// Route a result from the send collaborator.
    pub fn on_send_result(&mut self, temp_id: TempId, result: SendResult) -> SendDisposition {
        let disposition = self.submissions.on_send_result(temp_id, result);
        match &disposition {
            SendDisposition::Confirmed { server_item } => {
                let changes = self.store.reconcile_submission(temp_id, server_item.clone());
                self.route(changes);
            }
            SendDisposition::Exhausted { error } => {
                debug!(temp_id = %temp_id.0, error = %error, "submission exhausted");
                let changes = self.store.mark_failed(temp_id);
                self.route(changes);
            }
            SendDisposition::Retry { .. } | SendDisposition::Ignored => {}
        }
        disposition
    }

    /// Apply a server-pushed event.
    pub fn apply_remote_event(&mut self, event: RemoteEvent) {
        let changes = self.store.apply_remote_event(event);
        self.route(changes);
    }

    /// Abort a submission and drop its optimistic item. Any scheduled
    /// retry finds the record gone and does nothing.
    pub fn cancel(&mut self, temp_id: TempId) -> Result<()> {
        if !self.submissions.cancel(temp_id) {
            return Err(FeedError::UnknownSubmission(temp_id.0.to_string()));
        }
        let changes = self.store.remove(&ItemKey::Local(temp_id));
        self.route(changes);
        Ok(())
    }

    /// Remove an item; read marks referencing it are collected with it.
    pub fn remove(&mut self, key: &ItemKey) {
        let changes = self.store.remove(key);
        self.route(changes);
    }

    pub fn snapshot(&mut self) -> &[FeedItem] {
        self.store.snapshot()
    }

    pub fn item(&self, key: &ItemKey) -> Option<&FeedItem> {
        self.store.get(key)
    }

    pub fn dropped_events(&self) -> u64 {
        self.store.dropped_events()
    }

    /// Mark a single item read. A mark is only created for an item the
    /// store currently holds; returns whether one was recorded.
    pub fn mark_read(&mut self, key: &ItemKey, user_id: UserId) -> bool {
        if self.store.contains(key) {
            self.reads.mark_read(key.clone(), user_id, Utc::now());
            true
        } else {
            false
        }
    }

    /// Mark every currently visible item read for the user. Items that
    /// arrive later are unread again.
    pub fn mark_all_read(&mut self, user_id: UserId) {
        let now = Utc::now();
        let keys: Vec<ItemKey> = self
            .store
            .snapshot()
            .iter()
            .filter_map(FeedItem::key)
            .collect();
        for key in keys {
            self.reads.mark_read(key, user_id, now);
        }
    }

    pub fn unread_count(&mut self, user_id: UserId) -> usize {
        let snapshot = self.store.snapshot();
        self.reads.unread_count(user_id, snapshot)
    }

    pub fn submission(&self, temp_id: TempId) -> Option<&SubmissionRecord> {
        self.submissions.record(temp_id)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.submissions.policy()
    }

    pub fn presence_join(&mut self, user_id: UserId, display_name: impl Into<String>) {
        self.presence.join(user_id, display_name);
    }

    pub fn presence_leave(&mut self, user_id: UserId) {
        self.presence.leave(user_id);
    }

    /// Apply a presence change received from the transport.
    pub fn apply_presence(&mut self, update: PresenceUpdate) {
        match update {
            PresenceUpdate::Joined {
                user_id,
                display_name,
            } => self.presence.join(user_id, display_name),
            PresenceUpdate::Left { user_id } => self.presence.leave(user_id),
        }
    }

    pub fn members(&self) -> Vec<&PresenceEntry> {
        self.presence.members()
    }

    /// Invalidate the scope: no callback scheduled for this view fires
    /// after teardown.
    pub fn teardown(&mut self) {
        self.scope.invalidate();
    }

    fn route(&mut self, changes: Vec<StoreChange>) {
        for change in changes {
            match change {
                StoreChange::Removed(key) => self.reads.forget(&key),
                StoreChange::Reconciled { temp_id, id } => {
                    self.reads
                        .rekey(&ItemKey::Local(temp_id), ItemKey::Server(id));
                    self.submissions.mark_succeeded(temp_id);
                }
                StoreChange::Inserted(_) | StoreChange::Updated(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ItemId, SubmissionStatus};

    fn server_echo(temp_id: TempId, id: &str, sequence: u64, author: UserId) -> FeedItem {
        FeedItem::confirmed(ItemId::new(id), sequence, author, Payload::text("hello"))
            .with_temp_id(temp_id)
    }

    #[test]
    fn test_own_submission_is_read_for_author() {
        let mut session = FeedSession::new(FeedId::new(), UserId::new());
        let me = session.user_id();

        session.submit(Payload::text("hello"));

        assert_eq!(session.unread_count(me), 0);
    }

    #[test]
    fn test_remote_echo_settles_submission_without_send_result() {
        let mut session = FeedSession::new(FeedId::new(), UserId::new());
        let me = session.user_id();
        let temp_id = session.submit(Payload::text("hello"));

        // Confirmation arrives over the transport before the send result.
        session.apply_remote_event(RemoteEvent::insert(server_echo(temp_id, "s1", 5, me)));

        let record = session.submission(temp_id).unwrap();
        assert_eq!(record.status, SubmissionStatus::Succeeded);
        assert_eq!(session.snapshot().len(), 1);
        // Read state survived the reconciliation.
        assert_eq!(session.unread_count(me), 0);
    }

    #[test]
    fn test_remove_collects_read_marks() {
        let mut session = FeedSession::new(FeedId::new(), UserId::new());
        let me = session.user_id();
        let author = UserId::new();
        let item = FeedItem::confirmed(ItemId::new("s1"), 1, author, Payload::text("note"));
        session.apply_remote_event(RemoteEvent::insert(item));

        let key = ItemKey::Server(ItemId::new("s1"));
        assert!(session.mark_read(&key, me));
        session.remove(&key);

        assert_eq!(session.unread_count(me), 0);

        // The same id arriving again is a fresh, unread item: the old
        // mark was collected with the removal.
        let item = FeedItem::confirmed(ItemId::new("s1"), 1, author, Payload::text("note"));
        session.apply_remote_event(RemoteEvent::insert(item));
        assert_eq!(session.unread_count(me), 1);
    }

    #[test]
    fn test_mark_read_requires_held_item() {
        let mut session = FeedSession::new(FeedId::new(), UserId::new());
        let me = session.user_id();

        assert!(!session.mark_read(&ItemKey::Server(ItemId::new("ghost")), me));
    }

    #[test]
    fn test_cancel_drops_item_and_record() {
        let mut session = FeedSession::new(FeedId::new(), UserId::new());
        let temp_id = session.submit(Payload::text("typo"));

        session.cancel(temp_id).unwrap();

        assert!(session.snapshot().is_empty());
        assert!(session.submission(temp_id).is_none());

        // A second cancel has nothing left to abort.
        assert!(session.cancel(temp_id).is_err());
    }

    #[test]
    fn test_presence_updates_route_to_set() {
        let mut session = FeedSession::new(FeedId::new(), UserId::new());
        let alice = UserId::new();

        session.apply_presence(PresenceUpdate::Joined {
            user_id: alice,
            display_name: "Alice".to_string(),
        });
        assert_eq!(session.members().len(), 1);

        session.apply_presence(PresenceUpdate::Left { user_id: alice });
        assert!(session.members().is_empty());
    }
}
