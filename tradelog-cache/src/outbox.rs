//! Durable record of deliveries still owed to the remote store.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use shared::config::OutboxConfig;

/// Identifies one local entry awaiting delivery.
///
/// `scope` is the session id for messages and the session marker for
/// sessions themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersistKey {
    pub scope: String,
    pub local_id: String,
}

impl PersistKey {
    pub fn new(scope: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            local_id: local_id.into(),
        }
    }

    /// The `{scope}_{local_id}` form used by the pending-set.
    #[must_use]
    pub fn composite(&self) -> String {
        format!("{}_{}", self.scope, self.local_id)
    }
}

impl fmt::Display for PersistKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.composite())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    #[default]
    Pending,
    /// Gave up after the configured number of attempts.
    Failed,
}

/// What the delivery loop should do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Done,
    Retry(Duration),
    GaveUp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    #[serde(flatten)]
    pub key: PersistKey,
    pub attempts: u32,
    /// Milliseconds since the epoch.
    pub enqueued_at: i64,
    pub next_attempt_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub status: OutboxStatus,
}

impl OutboxEntry {
    #[must_use]
    pub fn new(key: PersistKey, now: i64, first_attempt_at: i64) -> Self {
        Self {
            key,
            attempts: 0,
            enqueued_at: now,
            next_attempt_at: first_attempt_at,
            last_error: None,
            status: OutboxStatus::Pending,
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == OutboxStatus::Failed
    }

    /// Records a failed attempt and decides between backing off and parking
    /// the entry.
    pub fn record_failure(&mut self, error: impl Into<String>, now: i64, policy: &OutboxConfig) -> Delivery {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());

        if self.attempts >= policy.max_attempts {
            self.status = OutboxStatus::Failed;
            return Delivery::GaveUp;
        }

        let backoff = policy.backoff_after(self.attempts);
        self.next_attempt_at = now.saturating_add(i64::try_from(backoff.as_millis()).unwrap_or(i64::MAX));
        Delivery::Retry(backoff)
    }

    /// Puts a parked entry back in line with a fresh attempt budget.
    pub fn rearm(&mut self, now: i64) {
        self.status = OutboxStatus::Pending;
        self.attempts = 0;
        self.next_attempt_at = now;
    }

    /// Time left until the entry is due, zero when overdue.
    #[must_use]
    pub fn due_in(&self, now: i64) -> Duration {
        Duration::from_millis(u64::try_from(self.next_attempt_at - now).unwrap_or(0))
    }
}
