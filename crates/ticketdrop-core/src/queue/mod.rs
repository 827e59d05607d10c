//! Offline reconciliation queue.
//!
//! Field clients that lose connectivity hand their deltas to the queue with
//! the client-side capture time. [`OfflineQueue::drain`] replays due entries
//! through [`Lifecycle::reconcile`], which resolves field conflicts by
//! last-writer-wins. Rejected replays are retried with exponential backoff
//! and parked as permanent failures once the attempt budget is spent.
//!
//! Entries live in a [`QueueStorage`]; the SQLite backend shares the ticket
//! database so queued work survives restarts.

pub mod storage;
pub mod worker;

pub use storage::{MemoryQueue, SqliteQueue};
pub use worker::{DrainWorker, spawn_drain_worker};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{DEFAULT_SKEW_THRESHOLD_SECS, check_client_skew};
use crate::config::QueueConfig;
use crate::error::ErrorCode;
use crate::lifecycle::{Lifecycle, Outcome};
use crate::model::{FieldDelta, ParseEnumError, Stage, TicketId};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue entry {0} not found")]
    NotFound(u64),

    #[error("queue storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("sqlite error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("queue entry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt queue entry: {0}")]
    Corrupt(String),
}

impl QueueError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) | Self::Corrupt(_) => ErrorCode::InternalUnexpected,
            Self::Store(err) => err.code(),
            Self::Backend(_) | Self::Serialization(_) => ErrorCode::StorageUnavailable,
        }
    }
}

/// What the replay should do once the deltas are in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateIntent {
    #[default]
    Record,
    /// Attempt the completion transition after applying.
    Complete,
}

impl UpdateIntent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Complete => "complete",
        }
    }
}

impl FromStr for UpdateIntent {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "record" => Ok(Self::Record),
            "complete" => Ok(Self::Complete),
            other => Err(ParseEnumError {
                expected: "queue intent",
                got: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    /// Out of attempts; needs manual reconciliation.
    Failed,
}

impl EntryStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "failed" => Ok(Self::Failed),
            other => Err(ParseEnumError {
                expected: "queue status",
                got: other.to_string(),
            }),
        }
    }
}

/// A queued batch of deltas for one ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: u64,
    pub ticket_id: TicketId,
    pub intent: UpdateIntent,
    pub deltas: Vec<FieldDelta>,
    pub client_ts: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub status: EntryStatus,
    pub last_error: Option<String>,
}

/// An entry before storage assigns its id.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub ticket_id: TicketId,
    pub intent: UpdateIntent,
    pub deltas: Vec<FieldDelta>,
    pub client_ts: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
}

/// Durable home for queue entries.
pub trait QueueStorage: Send + Sync {
    fn push(&self, entry: NewEntry) -> Result<QueueEntry, QueueError>;

    /// Pending entries whose next attempt is at or before `now`, oldest first.
    fn due(&self, now: DateTime<Utc>) -> Result<Vec<QueueEntry>, QueueError>;

    fn list(&self, status: EntryStatus) -> Result<Vec<QueueEntry>, QueueError>;

    /// Drop an entry that has been applied.
    fn remove(&self, id: u64) -> Result<(), QueueError>;

    /// Record a failed attempt and when to try next.
    fn reschedule(
        &self,
        id: u64,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), QueueError>;

    /// Park an entry as a permanent failure.
    fn fail(&self, id: u64, attempts: u32, error: &str) -> Result<(), QueueError>;
}

/// Exponential backoff: `base`, `2 * base`, `4 * base`, ... for at most
/// `max_attempts` tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_backoff_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exponent)
    }

    #[must_use]
    pub const fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Per-entry outcome of a drain pass.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ApplyResult {
    Applied {
        entry: u64,
        ticket: TicketId,
        stage: Stage,
        applied: Vec<String>,
        /// Fields skipped because the stored value is as new or newer.
        conflicts: Vec<String>,
    },
    /// Every delta lost last-writer-wins; informational only.
    Conflict {
        entry: u64,
        ticket: TicketId,
        conflicts: Vec<String>,
    },
    Retrying {
        entry: u64,
        ticket: TicketId,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        reason: String,
    },
    PermanentFailure {
        entry: u64,
        ticket: TicketId,
        attempts: u32,
        reason: String,
    },
}

impl ApplyResult {
    #[must_use]
    pub const fn entry(&self) -> u64 {
        match self {
            Self::Applied { entry, .. }
            | Self::Conflict { entry, .. }
            | Self::Retrying { entry, .. }
            | Self::PermanentFailure { entry, .. } => *entry,
        }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::PermanentFailure { .. })
    }

    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Applied { .. } => None,
            Self::Conflict { .. } => Some(ErrorCode::ReconciliationConflict),
            Self::Retrying { .. } | Self::PermanentFailure { .. } => {
                Some(ErrorCode::ReconciliationFailed)
            }
        }
    }
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied {
                entry,
                ticket,
                stage,
                applied,
                conflicts,
            } => {
                write!(f, "#{entry} {ticket}: applied {} field(s), now {stage}", applied.len())?;
                if !conflicts.is_empty() {
                    write!(f, "; skipped stale {}", conflicts.join(", "))?;
                }
                Ok(())
            }
            Self::Conflict {
                entry,
                ticket,
                conflicts,
            } => write!(f, "#{entry} {ticket}: nothing newer than stored ({})", conflicts.join(", ")),
            Self::Retrying {
                entry,
                ticket,
                attempts,
                next_attempt_at,
                reason,
            } => write!(
                f,
                "#{entry} {ticket}: attempt {attempts} failed ({reason}); retry at {}",
                next_attempt_at.to_rfc3339()
            ),
            Self::PermanentFailure {
                entry,
                ticket,
                attempts,
                reason,
            } => write!(
                f,
                "#{entry} {ticket}: gave up after {attempts} attempt(s): {reason}"
            ),
        }
    }
}

/// The reconciliation queue in front of a [`Lifecycle`].
pub struct OfflineQueue {
    storage: Arc<dyn QueueStorage>,
    lifecycle: Arc<Lifecycle>,
    policy: RetryPolicy,
}

impl fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl OfflineQueue {
    #[must_use]
    pub fn new(storage: Arc<dyn QueueStorage>, lifecycle: Arc<Lifecycle>, policy: RetryPolicy) -> Self {
        Self {
            storage,
            lifecycle,
            policy,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    #[must_use]
    pub const fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Queue deltas captured offline. Never blocks on ticket state.
    pub fn enqueue(
        &self,
        ticket_id: TicketId,
        deltas: Vec<FieldDelta>,
        client_ts: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError> {
        self.push(ticket_id, deltas, client_ts, UpdateIntent::Record)
    }

    /// Queue final deltas together with a request to complete the ticket.
    pub fn enqueue_completion(
        &self,
        ticket_id: TicketId,
        deltas: Vec<FieldDelta>,
        client_ts: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError> {
        self.push(ticket_id, deltas, client_ts, UpdateIntent::Complete)
    }

    fn push(
        &self,
        ticket_id: TicketId,
        deltas: Vec<FieldDelta>,
        client_ts: DateTime<Utc>,
        intent: UpdateIntent,
    ) -> Result<QueueEntry, QueueError> {
        let now = self.lifecycle.now();
        if let Some(skew) = check_client_skew(client_ts, now, DEFAULT_SKEW_THRESHOLD_SECS) {
            tracing::warn!(ticket = %ticket_id, skew_secs = skew.skew_secs, "{}", skew.message);
        }
        let entry = self.storage.push(NewEntry {
            ticket_id,
            intent,
            deltas,
            client_ts,
            enqueued_at: now,
        })?;
        tracing::debug!(
            entry = entry.id,
            ticket = %entry.ticket_id,
            deltas = entry.deltas.len(),
            intent = entry.intent.as_str(),
            "queued offline update"
        );
        Ok(entry)
    }

    /// Replay every entry due at `now`, in storage order.
    ///
    /// Each entry gets an itemized result; one failing entry never stops the
    /// pass. Only queue storage faults are `Err`.
    pub fn drain(&self, now: DateTime<Utc>) -> Result<Vec<ApplyResult>, QueueError> {
        let due = self.storage.due(now)?;
        let mut results = Vec::with_capacity(due.len());
        for entry in due {
            results.push(self.apply(&entry, now)?);
        }
        if !results.is_empty() {
            tracing::info!(entries = results.len(), "drained offline queue");
        }
        Ok(results)
    }

    fn apply(&self, entry: &QueueEntry, now: DateTime<Utc>) -> Result<ApplyResult, QueueError> {
        let complete = entry.intent == UpdateIntent::Complete;
        let reason = match self.lifecycle.reconcile(
            &entry.ticket_id,
            &entry.deltas,
            entry.client_ts,
            complete,
        ) {
            Ok(Outcome::Applied { value, .. }) => {
                self.storage.remove(entry.id)?;
                if value.applied.is_empty() && !value.conflicts.is_empty() {
                    return Ok(ApplyResult::Conflict {
                        entry: entry.id,
                        ticket: entry.ticket_id.clone(),
                        conflicts: value.conflicts,
                    });
                }
                return Ok(ApplyResult::Applied {
                    entry: entry.id,
                    ticket: entry.ticket_id.clone(),
                    stage: value.ticket.stage,
                    applied: value.applied,
                    conflicts: value.conflicts,
                });
            }
            Ok(Outcome::Rejected { rejection }) => rejection.to_string(),
            Err(err) => err.to_string(),
        };

        let attempts = entry.attempts + 1;
        if self.policy.exhausted(attempts) {
            self.storage.fail(entry.id, attempts, &reason)?;
            tracing::warn!(
                entry = entry.id,
                ticket = %entry.ticket_id,
                attempts,
                reason = %reason,
                "offline update needs manual reconciliation"
            );
            return Ok(ApplyResult::PermanentFailure {
                entry: entry.id,
                ticket: entry.ticket_id.clone(),
                attempts,
                reason,
            });
        }

        let delay = chrono::Duration::from_std(self.policy.delay_after(attempts))
            .unwrap_or(chrono::Duration::MAX);
        let next_attempt_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.storage.reschedule(entry.id, attempts, next_attempt_at, &reason)?;
        tracing::debug!(entry = entry.id, attempts, %next_attempt_at, "offline update will be retried");
        Ok(ApplyResult::Retrying {
            entry: entry.id,
            ticket: entry.ticket_id.clone(),
            attempts,
            next_attempt_at,
            reason,
        })
    }

    /// Entries still waiting to apply.
    pub fn pending(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.storage.list(EntryStatus::Pending)
    }

    /// Entries that exhausted their attempts.
    pub fn failed(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.storage.list(EntryStatus::Failed)
    }
}
