/// Async driver around a feed session
/// Owns the channel toward the external send collaborator and the retry
/// timers. Every scheduled callback checks the scope token first, so
/// nothing fires after the feed view is torn down.
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::{
    FeedError, FeedId, FeedItem, FeedSession, ItemKey, Payload, PresenceUpdate, RemoteEvent,
    Result, RetryPolicy, ScopeToken, SendDisposition, SendResult, SubmissionStatus, TempId, UserId,
};

/// A submission handed to the external send collaborator
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub temp_id: TempId,
    pub item: FeedItem,
}

pub struct FeedClient {
    session: Arc<Mutex<FeedSession>>,
    send_tx: mpsc::UnboundedSender<SendRequest>,
    scope: ScopeToken,
}

impl FeedClient {
    /// Create a client and the receiver the send collaborator drains.
    pub fn new(feed_id: FeedId, user_id: UserId) -> (Self, mpsc::UnboundedReceiver<SendRequest>) {
        Self::with_policy(feed_id, user_id, RetryPolicy::default())
    }

    pub fn with_policy(
        feed_id: FeedId,
        user_id: UserId,
        policy: RetryPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<SendRequest>) {
        let session = FeedSession::with_policy(feed_id, user_id, policy);
        let scope = session.scope();
        let (send_tx, send_rx) = mpsc::unbounded_channel();

        (
            Self {
                session: Arc::new(Mutex::new(session)),
                send_tx,
                scope,
            },
            send_rx,
        )
    }

    /// Shared handle to the underlying session, for rendering-layer reads.
    pub fn session(&self) -> Arc<Mutex<FeedSession>> {
        self.session.clone()
    }

    /// Submit new content. The optimistic item is visible immediately and
    /// the send collaborator receives one request for it.
    pub async fn submit(&self, payload: Payload) -> Result<TempId> {
        let mut session = self.session.lock().await;
        let temp_id = session.submit(payload);
        if let Some(item) = session.item(&ItemKey::Local(temp_id)).cloned() {
            self.send_tx
                .send(SendRequest { temp_id, item })
                .map_err(|e| FeedError::NetworkError(e.to_string()))?;
        }
        Ok(temp_id)
    }

    /// Record a send result. A retryable failure schedules a backoff
    /// timer that re-emits the request only while the scope is alive and
    /// the submission is still in flight.
    pub async fn on_send_result(&self, temp_id: TempId, result: SendResult) {
        let disposition = self.session.lock().await.on_send_result(temp_id, result);

        if let SendDisposition::Retry { attempt, delay } = disposition {
            debug!(temp_id = %temp_id.0, attempt, ?delay, "scheduling retry");
            let session = self.session.clone();
            let send_tx = self.send_tx.clone();
            let scope = self.scope.clone();

            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !scope.is_alive() {
                    return;
                }

                let session = session.lock().await;
                let in_flight = session
                    .submission(temp_id)
                    .map(|record| record.status == SubmissionStatus::InFlight)
                    .unwrap_or(false);
                if !in_flight {
                    return;
                }

                if let Some(item) = session.item(&ItemKey::Local(temp_id)).cloned() {
                    let _ = send_tx.send(SendRequest { temp_id, item });
                }
            });
        }
    }

    /// Apply a server-pushed event from the transport.
    pub async fn apply_remote_event(&self, event: RemoteEvent) {
        self.session.lock().await.apply_remote_event(event);
    }

    pub async fn apply_presence(&self, update: PresenceUpdate) {
        self.session.lock().await.apply_presence(update);
    }

    /// Abort a submission: any scheduled retry finds the record gone and
    /// does nothing.
    pub async fn cancel(&self, temp_id: TempId) -> Result<()> {
        self.session.lock().await.cancel(temp_id)
    }

    pub async fn snapshot(&self) -> Vec<FeedItem> {
        self.session.lock().await.snapshot().to_vec()
    }

    pub async fn unread_count(&self, user_id: UserId) -> usize {
        self.session.lock().await.unread_count(user_id)
    }

    pub async fn mark_all_read(&self, user_id: UserId) {
        self.session.lock().await.mark_all_read(user_id);
    }

    /// Tear down the feed view: invalidates the scope so no scheduled
    /// retry fires afterwards. The transport subscription is external and
    /// is dropped by its owner.
    pub fn teardown(&self) {
        self.scope.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            factor: 2,
            max_delay: Duration::from_millis(40),
        }
    }

    #[test]
    fn test_submit_emits_one_send_request() {
        tokio_test::block_on(async {
            let (client, mut send_rx) = FeedClient::new(FeedId::new(), UserId::new());

            let temp_id = client.submit(Payload::text("hello")).await.unwrap();

            let request = send_rx.recv().await.unwrap();
            assert_eq!(request.temp_id, temp_id);
            assert_eq!(request.item.temp_id, Some(temp_id));
        });
    }

    #[tokio::test]
    async fn test_failure_schedules_resend() {
        let (client, mut send_rx) =
            FeedClient::with_policy(FeedId::new(), UserId::new(), quick_policy());
        let temp_id = client.submit(Payload::text("flaky")).await.unwrap();
        let _first = send_rx.recv().await.unwrap();

        client
            .on_send_result(
                temp_id,
                SendResult::Failure {
                    error: "timeout".to_string(),
                },
            )
            .await;

        tokio::select! {
            request = send_rx.recv() => {
                assert_eq!(request.unwrap().temp_id, temp_id);
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                panic!("retry was never re-emitted");
            }
        }
    }

    #[tokio::test]
    async fn test_teardown_cancels_scheduled_retry() {
        let (client, mut send_rx) =
            FeedClient::with_policy(FeedId::new(), UserId::new(), quick_policy());
        let temp_id = client.submit(Payload::text("doomed")).await.unwrap();
        let _first = send_rx.recv().await.unwrap();

        client
            .on_send_result(
                temp_id,
                SendResult::Failure {
                    error: "timeout".to_string(),
                },
            )
            .await;
        client.teardown();

        tokio::select! {
            _ = send_rx.recv() => {
                panic!("retry fired after teardown");
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    #[tokio::test]
    async fn test_cancel_suppresses_scheduled_retry() {
        let (client, mut send_rx) =
            FeedClient::with_policy(FeedId::new(), UserId::new(), quick_policy());
        let temp_id = client.submit(Payload::text("typo")).await.unwrap();
        let _first = send_rx.recv().await.unwrap();

        client
            .on_send_result(
                temp_id,
                SendResult::Failure {
                    error: "timeout".to_string(),
                },
            )
            .await;
        client.cancel(temp_id).await.unwrap();

        assert!(client.snapshot().await.is_empty());
        tokio::select! {
            _ = send_rx.recv() => {
                panic!("retry fired for a cancelled submission");
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
}
