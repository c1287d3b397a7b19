/// In-flight submission tracking and retry policy
/// The queue owns the retry policy so ordering and merge logic in the
/// store stays independent of network behavior; the timers themselves
/// live in the async client driver and check the scope token.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{FeedItem, TempId};

/// Retry policy for failed submissions
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            factor: 2,
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Backoff scheduled after the given number of failures (1-based).
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(self.factor.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    InFlight,
    Succeeded,
    Exhausted,
}

/// Bookkeeping for one local create request
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub temp_id: TempId,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub status: SubmissionStatus,
}

/// Result reported by the external send collaborator
#[derive(Debug, Clone)]
pub enum SendResult {
    Success { server_item: FeedItem },
    Failure { error: String },
}

/// What the caller must do after a send result is recorded
#[derive(Debug, Clone, PartialEq)]
pub enum SendDisposition {
    /// Replace the pending item with the confirmed one
    Confirmed { server_item: FeedItem },
    /// Schedule a retry after the given backoff
    Retry { attempt: u32, delay: Duration },
    /// Retries exhausted; the item transitions to FAILED
    Exhausted { error: String },
    /// Nothing to do (duplicate result for a settled submission)
    Ignored,
}

#[derive(Debug)]
pub struct SubmissionQueue {
    records: HashMap<TempId, SubmissionRecord>,
    policy: RetryPolicy,
}

impl SubmissionQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            records: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn record(&self, temp_id: TempId) -> Option<&SubmissionRecord> {
        self.records.get(&temp_id)
    }

    pub fn in_flight(&self) -> usize {
        self.records
            .values()
            .filter(|record| record.status == SubmissionStatus::InFlight)
            .count()
    }

    /// Register a fresh submission (attempt 1, in flight).
    pub fn enqueue(&mut self, temp_id: TempId) {
        self.records.insert(
            temp_id,
            SubmissionRecord {
                temp_id,
                attempts: 1,
                last_error: None,
                status: SubmissionStatus::InFlight,
            },
        );
    }

    /// Record a result from the send collaborator and decide what happens
    /// next. A success for an unknown temp id (queue cleared, late
    /// confirmation) still confirms: the server is authoritative.
    pub fn on_send_result(&mut self, temp_id: TempId, result: SendResult) -> SendDisposition {
        let Some(record) = self.records.get_mut(&temp_id) else {
            return match result {
                SendResult::Success { server_item } => SendDisposition::Confirmed { server_item },
                SendResult::Failure { .. } => SendDisposition::Ignored,
            };
        };

        if record.status != SubmissionStatus::InFlight {
            return SendDisposition::Ignored;
        }

        match result {
            SendResult::Success { server_item } => {
                record.status = SubmissionStatus::Succeeded;
                SendDisposition::Confirmed { server_item }
            }
            SendResult::Failure { error } => {
                record.last_error = Some(error.clone());
                if record.attempts < self.policy.max_attempts {
                    record.attempts += 1;
                    SendDisposition::Retry {
                        attempt: record.attempts,
                        delay: self.policy.delay_after(record.attempts - 1),
                    }
                } else {
                    record.status = SubmissionStatus::Exhausted;
                    SendDisposition::Exhausted { error }
                }
            }
        }
    }

    /// The confirmation arrived through the feed (remote echo) before or
    /// instead of the send result.
    pub fn mark_succeeded(&mut self, temp_id: TempId) {
        if let Some(record) = self.records.get_mut(&temp_id) {
            if record.status == SubmissionStatus::InFlight {
                record.status = SubmissionStatus::Succeeded;
            }
        }
    }

    /// Abort a submission. Returns true if a record was dropped; the
    /// caller also removes the optimistic item from the store.
    pub fn cancel(&mut self, temp_id: TempId) -> bool {
        self.records.remove(&temp_id).is_some()
    }
}

impl Default for SubmissionQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// Teardown guard for scheduled callbacks. Cloned into every retry timer;
/// a callback that finds the scope invalidated does nothing.
#[derive(Debug, Clone)]
pub struct ScopeToken {
    alive: Arc<AtomicBool>,
}

impl ScopeToken {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl Default for ScopeToken {
    fn default() -> Self {
        Self::new()
    }
}
