//! Idempotency ledger: the single source of truth for per-event progress.
//!
//! Every ledger operation is atomic with respect to concurrent callers on the
//! same event. The ledger guarantees:
//!
//! - at most one `in_progress` lease per event at any time
//! - `committed` is permanent; a committed event is never leased again
//! - only the current lease holder can commit or release
//! - failure history is kept for audit and entries are never removed
//!
//! The transition rules live on [`LedgerEntry`] so every backend applies
//! them identically inside its own atomic section. Two backends ship:
//! [`memory::InMemoryLedger`] for tests and [`file::FileLedger`], which
//! survives restarts.

pub mod file;
pub mod memory;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tipoff_core::{EventId, OwnerToken};

use crate::error::{Error, FailureKind, Result};
use crate::forecast::ForecastRecord;
use crate::scheduler::retry::{RetryDecision, RetryPolicy};

/// Per-event ledger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    /// No attempt has been made.
    NotStarted,
    /// A scheduler instance holds the lease.
    InProgress,
    /// A forecast was committed. Permanent.
    Committed,
    /// The last attempt failed (retry pending or dead-lettered).
    Failed,
}

impl LedgerState {
    /// Returns true if the transition to `target` is allowed.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::NotStarted => matches!(target, Self::InProgress | Self::Failed),
            Self::InProgress => matches!(target, Self::Committed | Self::Failed),
            Self::Failed => matches!(target, Self::InProgress),
            Self::Committed => false,
        }
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Why an entry became terminally `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The generation attempt budget ran out.
    AttemptsExhausted,
    /// The data-readiness budget ran out.
    DataWaitsExhausted,
    /// The event left `scheduled` or started before a forecast was committed.
    EventWithdrawn,
}

impl TerminalReason {
    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::AttemptsExhausted => "attempts_exhausted",
            Self::DataWaitsExhausted => "data_waits_exhausted",
            Self::EventWithdrawn => "event_withdrawn",
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// One failed attempt, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Generation attempt number the failure belongs to.
    pub attempt: u32,
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a failure record.
    #[must_use]
    pub fn new(attempt: u32, kind: FailureKind, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            attempt,
            kind,
            message: message.into(),
            at,
        }
    }
}

/// An exclusive, time-bounded claim on an event's processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// The leased event.
    pub event_id: EventId,
    /// The scheduler instance holding the lease.
    pub owner: OwnerToken,
    /// Generation attempt number this lease represents.
    pub attempt: u32,
    /// Monotonic per-entry lease sequence; distinguishes re-acquisitions.
    pub sequence: u64,
    /// When the lease was granted.
    pub acquired_at: DateTime<Utc>,
}

/// Result of [`IdempotencyLedger::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireResult {
    /// The caller now holds the lease.
    Acquired(Lease),
    /// Another worker holds the lease.
    AlreadyLeased {
        /// Current lease holder.
        owner: Option<OwnerToken>,
    },
    /// A forecast is already committed.
    AlreadyCommitted,
    /// The event is terminally failed.
    DeadLettered {
        /// Why the event was dead-lettered.
        reason: TerminalReason,
    },
    /// The last failure is still backing off.
    BackingOff {
        /// Earliest retry time.
        retry_at: DateTime<Utc>,
    },
}

impl AcquireResult {
    /// Returns true if the lease was acquired.
    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Acquired(_) => "acquired",
            Self::AlreadyLeased { .. } => "already_leased",
            Self::AlreadyCommitted => "already_committed",
            Self::DeadLettered { .. } => "dead_lettered",
            Self::BackingOff { .. } => "backing_off",
        }
    }
}

/// Result of [`IdempotencyLedger::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    /// The forecast was committed.
    Committed,
    /// A forecast was already committed (an earlier lease holder won).
    AlreadyCommitted,
    /// The caller no longer holds the lease.
    LeaseLost,
}

impl CommitResult {
    /// Returns true if this call committed the forecast.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// Result of releasing a lease after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseResult {
    /// The event will be retried.
    Retry {
        /// Earliest retry time.
        retry_at: DateTime<Utc>,
    },
    /// The event is terminally failed.
    DeadLettered {
        /// Why the event was dead-lettered.
        reason: TerminalReason,
    },
    /// The caller no longer holds the lease; nothing changed.
    LeaseLost,
}

impl ReleaseResult {
    /// Returns true if the event was dead-lettered.
    #[must_use]
    pub const fn is_dead_lettered(&self) -> bool {
        matches!(self, Self::DeadLettered { .. })
    }
}

/// A stale lease recovered by [`IdempotencyLedger::reclaim_stale`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reclaimed {
    /// The event whose lease was reclaimed.
    pub event_id: EventId,
    /// The owner that lost the lease.
    pub previous_owner: Option<OwnerToken>,
    /// Retry or dead-letter.
    pub outcome: ReleaseResult,
}

/// Durable record of per-event progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Primary key.
    pub event_id: EventId,
    /// Current state.
    pub state: LedgerState,
    /// Generation attempts consumed.
    pub attempt_count: u32,
    /// Data-readiness failures consumed.
    pub data_wait_count: u32,
    /// When the last lease was granted.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Lease holder (set while `in_progress`; the committing owner afterwards).
    pub owner: Option<OwnerToken>,
    /// Sequence number of the current or last lease.
    pub lease_sequence: u64,
    /// Earliest retry time while `failed` and not dead-lettered.
    pub retry_at: Option<DateTime<Utc>>,
    /// Set once the entry is terminally failed.
    pub terminal: Option<TerminalReason>,
    /// Every failure, oldest first.
    pub failures: Vec<FailureRecord>,
    /// The committed forecast.
    pub forecast: Option<ForecastRecord>,
    /// True once the committed forecast reached the persistence gateway.
    pub published: bool,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Creates a `not_started` entry.
    #[must_use]
    pub fn new(event_id: EventId, now: DateTime<Utc>) -> Self {
        Self {
            event_id,
            state: LedgerState::NotStarted,
            attempt_count: 0,
            data_wait_count: 0,
            last_attempt_at: None,
            owner: None,
            lease_sequence: 0,
            retry_at: None,
            terminal: None,
            failures: Vec::new(),
            forecast: None,
            published: false,
            updated_at: now,
        }
    }

    /// Returns true if the entry is terminally failed.
    #[must_use]
    pub const fn is_dead_lettered(&self) -> bool {
        self.terminal.is_some()
    }

    /// Returns true if the entry may still change (leased or awaiting retry).
    #[must_use]
    pub fn is_open(&self) -> bool {
        match self.state {
            LedgerState::NotStarted | LedgerState::InProgress => true,
            LedgerState::Failed => self.terminal.is_none(),
            LedgerState::Committed => false,
        }
    }

    /// Returns true if `lease` is the current lease on this entry.
    #[must_use]
    pub fn holds(&self, lease: &Lease) -> bool {
        self.state == LedgerState::InProgress
            && self.owner == Some(lease.owner)
            && self.lease_sequence == lease.sequence
    }

    /// Returns true if the in-progress lease was granted at least `threshold` ago.
    #[must_use]
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.state == LedgerState::InProgress
            && self
                .last_attempt_at
                .is_some_and(|at| now - at >= crate::signed(threshold))
    }

    /// Attempts to grant a lease to `owner`.
    pub fn acquire(&mut self, owner: OwnerToken, now: DateTime<Utc>) -> AcquireResult {
        match self.state {
            LedgerState::Committed => return AcquireResult::AlreadyCommitted,
            LedgerState::InProgress => {
                return AcquireResult::AlreadyLeased { owner: self.owner };
            }
            LedgerState::NotStarted | LedgerState::Failed => {}
        }
        if let Some(reason) = self.terminal {
            return AcquireResult::DeadLettered { reason };
        }
        if let Some(retry_at) = self.retry_at.filter(|at| *at > now) {
            return AcquireResult::BackingOff { retry_at };
        }

        self.state = LedgerState::InProgress;
        self.attempt_count += 1;
        self.lease_sequence += 1;
        self.owner = Some(owner);
        self.last_attempt_at = Some(now);
        self.retry_at = None;
        self.updated_at = now;
        AcquireResult::Acquired(Lease {
            event_id: self.event_id.clone(),
            owner,
            attempt: self.attempt_count,
            sequence: self.lease_sequence,
            acquired_at: now,
        })
    }

    /// Commits `forecast` under `lease`.
    ///
    /// # Errors
    ///
    /// Returns an error if `forecast` is not `pending`.
    pub fn commit(
        &mut self,
        lease: &Lease,
        forecast: &ForecastRecord,
        now: DateTime<Utc>,
    ) -> Result<CommitResult> {
        if self.state == LedgerState::Committed {
            return Ok(CommitResult::AlreadyCommitted);
        }
        if !self.holds(lease) {
            return Ok(CommitResult::LeaseLost);
        }
        self.forecast = Some(forecast.committed()?);
        self.state = LedgerState::Committed;
        self.published = false;
        self.retry_at = None;
        self.updated_at = now;
        Ok(CommitResult::Committed)
    }

    /// Releases `lease` after `failure`, applying `policy`.
    pub fn release(
        &mut self,
        lease: &Lease,
        failure: FailureRecord,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> ReleaseResult {
        if !self.holds(lease) {
            return ReleaseResult::LeaseLost;
        }
        self.apply_failure(failure, policy, now)
    }

    /// Reclaims a stale lease as a [`FailureKind::LeaseExpired`] failure.
    ///
    /// Returns `None` if the entry is not stale.
    pub fn reclaim(
        &mut self,
        threshold: Duration,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Option<Reclaimed> {
        if !self.is_stale(threshold, now) {
            return None;
        }
        let previous_owner = self.owner;
        let failure = FailureRecord::new(
            self.attempt_count,
            FailureKind::LeaseExpired,
            format!("lease older than {}s reclaimed", threshold.as_secs()),
            now,
        );
        let outcome = self.apply_failure(failure, policy, now);
        Some(Reclaimed {
            event_id: self.event_id.clone(),
            previous_owner,
            outcome,
        })
    }

    /// Terminates an open entry because its event was withdrawn.
    ///
    /// Never touches committed or dead-lettered entries; an `in_progress`
    /// entry is closed only by its current lease holder. Returns true if the
    /// entry was closed.
    pub fn close(&mut self, lease: Option<&Lease>, reason: &str, now: DateTime<Utc>) -> bool {
        if !self.is_open() {
            return false;
        }
        if self.state == LedgerState::InProgress && !lease.is_some_and(|l| self.holds(l)) {
            return false;
        }
        self.failures.push(FailureRecord::new(
            self.attempt_count,
            FailureKind::EventWithdrawn,
            reason,
            now,
        ));
        self.state = LedgerState::Failed;
        self.terminal = Some(TerminalReason::EventWithdrawn);
        self.owner = None;
        self.retry_at = None;
        self.updated_at = now;
        true
    }

    fn apply_failure(
        &mut self,
        failure: FailureRecord,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> ReleaseResult {
        if failure.kind.is_data_readiness() {
            self.attempt_count = self.attempt_count.saturating_sub(1);
            self.data_wait_count += 1;
        }
        let decision = policy.decide(failure.kind, self.attempt_count, self.data_wait_count);
        let kind = failure.kind;
        self.failures.push(failure);
        self.state = LedgerState::Failed;
        self.owner = None;
        self.updated_at = now;

        match decision {
            RetryDecision::RetryAfter(delay) => {
                let retry_at = now
                    .checked_add_signed(crate::signed(delay))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                self.retry_at = Some(retry_at);
                ReleaseResult::Retry { retry_at }
            }
            RetryDecision::DeadLetter => {
                let reason = if kind.is_data_readiness() {
                    TerminalReason::DataWaitsExhausted
                } else {
                    TerminalReason::AttemptsExhausted
                };
                self.terminal = Some(reason);
                self.retry_at = None;
                ReleaseResult::DeadLettered { reason }
            }
        }
    }
}

/// Entries keyed by event, with the [`LedgerEntry`] rules applied per call.
///
/// Backends hold one table inside their own atomic section and supply `now`
/// from their clock.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct LedgerTable {
    entries: HashMap<EventId, LedgerEntry>,
}

impl LedgerTable {
    pub(crate) fn from_entries(entries: impl IntoIterator<Item = LedgerEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.event_id.clone(), e))
                .collect(),
        }
    }

    pub(crate) fn get(&self, event_id: &EventId) -> Option<LedgerEntry> {
        self.entries.get(event_id).cloned()
    }

    /// Every entry, ordered by event id.
    pub(crate) fn all(&self) -> Vec<LedgerEntry> {
        let mut all: Vec<LedgerEntry> = self.entries.values().cloned().collect();
        all.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        all
    }

    pub(crate) fn acquire(
        &mut self,
        event_id: &EventId,
        owner: OwnerToken,
        now: DateTime<Utc>,
    ) -> AcquireResult {
        self.entries
            .entry(event_id.clone())
            .or_insert_with(|| LedgerEntry::new(event_id.clone(), now))
            .acquire(owner, now)
    }

    pub(crate) fn commit(
        &mut self,
        lease: &Lease,
        forecast: &ForecastRecord,
        now: DateTime<Utc>,
    ) -> Result<CommitResult> {
        if forecast.event_id != lease.event_id {
            return Err(Error::InvalidStateTransition {
                from: LedgerState::InProgress.to_string(),
                to: LedgerState::Committed.to_string(),
                reason: format!(
                    "forecast for {} cannot commit lease on {}",
                    forecast.event_id, lease.event_id
                ),
            });
        }
        match self.entries.get_mut(&lease.event_id) {
            Some(entry) => entry.commit(lease, forecast, now),
            None => Ok(CommitResult::LeaseLost),
        }
    }

    pub(crate) fn release(
        &mut self,
        lease: &Lease,
        mut failure: FailureRecord,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> ReleaseResult {
        failure.at = now;
        match self.entries.get_mut(&lease.event_id) {
            Some(entry) => entry.release(lease, failure, policy, now),
            None => ReleaseResult::LeaseLost,
        }
    }

    pub(crate) fn reclaim_stale(
        &mut self,
        threshold: Duration,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Vec<Reclaimed> {
        let mut reclaimed: Vec<Reclaimed> = self
            .entries
            .values_mut()
            .filter_map(|entry| entry.reclaim(threshold, policy, now))
            .collect();
        reclaimed.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        reclaimed
    }

    pub(crate) fn close(
        &mut self,
        event_id: &EventId,
        lease: Option<&Lease>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> bool {
        self.entries
            .get_mut(event_id)
            .is_some_and(|entry| entry.close(lease, reason, now))
    }

    pub(crate) fn open_entries(&self) -> Vec<LedgerEntry> {
        let mut open: Vec<LedgerEntry> = self
            .entries
            .values()
            .filter(|e| e.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        open
    }

    pub(crate) fn unpublished_commits(&self) -> Vec<ForecastRecord> {
        let mut pending: Vec<ForecastRecord> = self
            .entries
            .values()
            .filter(|e| e.state == LedgerState::Committed && !e.published)
            .filter_map(|e| e.forecast.clone())
            .collect();
        pending.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        pending
    }

    pub(crate) fn mark_published(&mut self, event_id: &EventId, now: DateTime<Utc>) -> bool {
        match self.entries.get_mut(event_id) {
            Some(entry) if entry.state == LedgerState::Committed => {
                entry.published = true;
                entry.updated_at = now;
                true
            }
            _ => false,
        }
    }
}

/// Durable, atomic per-event progress store.
///
/// Lease grants, failures and retry deadlines are stamped from the ledger's
/// own [`Clock`](crate::clock::Clock), never from the caller's evaluation
/// time.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync`; each call is atomic for its event.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Gets an entry. `None` means `not_started`.
    async fn get(&self, event_id: &EventId) -> Result<Option<LedgerEntry>>;

    /// Atomically acquires the lease for `event_id`.
    ///
    /// Succeeds from `not_started`, or from `failed` when retry-eligible
    /// (not dead-lettered and `retry_at` has passed), incrementing the
    /// attempt count.
    async fn try_acquire(&self, event_id: &EventId, owner: OwnerToken) -> Result<AcquireResult>;

    /// Moves the entry to `committed` and stores the committed forecast.
    async fn commit(&self, lease: &Lease, forecast: &ForecastRecord) -> Result<CommitResult>;

    /// Releases the lease after a failure: retry with backoff, or dead-letter.
    ///
    /// `failure.at` is replaced with the ledger's current time.
    async fn release_for_retry(&self, lease: &Lease, failure: FailureRecord)
    -> Result<ReleaseResult>;

    /// Reclaims every lease granted at least `threshold` ago.
    async fn reclaim_stale(&self, threshold: Duration) -> Result<Vec<Reclaimed>>;

    /// Terminates an open entry for a withdrawn event. See [`LedgerEntry::close`].
    async fn close(&self, event_id: &EventId, lease: Option<&Lease>, reason: &str)
    -> Result<bool>;

    /// Entries that are leased or awaiting retry.
    async fn open_entries(&self) -> Result<Vec<LedgerEntry>>;

    /// Committed forecasts not yet confirmed as persisted.
    async fn unpublished_commits(&self) -> Result<Vec<ForecastRecord>>;

    /// Records that the committed forecast reached the persistence gateway.
    ///
    /// Returns false if the entry is not committed.
    async fn mark_published(&self, event_id: &EventId) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::{ForecastStatus, OutcomeLabel};

    fn now() -> DateTime<Utc> {
        "2024-11-02T22:30:00Z".parse().unwrap()
    }

    fn entry() -> LedgerEntry {
        LedgerEntry::new(EventId::new("g1").unwrap(), now())
    }

    fn forecast(attempt: u32) -> ForecastRecord {
        ForecastRecord {
            event_id: EventId::new("g1").unwrap(),
            outcome: OutcomeLabel::Away,
            confidence: 0.58,
            raw_confidence: 0.58,
            rationale: "Road form.".into(),
            model_id: "scripted".into(),
            snapshot_version: 7,
            attempt,
            context_gaps: Vec::new(),
            created_at: now(),
            status: ForecastStatus::Pending,
        }
    }

    fn lease_of(result: AcquireResult) -> Lease {
        match result {
            AcquireResult::Acquired(lease) => lease,
            other => panic!("expected lease, got {other:?}"),
        }
    }

    #[test]
    fn state_transitions() {
        use LedgerState::*;
        assert!(NotStarted.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Committed));
        assert!(Failed.can_transition_to(InProgress));
        assert!(!Committed.can_transition_to(InProgress));
        assert!(!Committed.can_transition_to(Failed));
    }

    #[test]
    fn second_acquire_is_rejected_while_leased() {
        let mut e = entry();
        let owner = OwnerToken::generate();
        assert!(e.acquire(owner, now()).is_acquired());
        assert!(matches!(
            e.acquire(OwnerToken::generate(), now()),
            AcquireResult::AlreadyLeased { owner: Some(o) } if o == owner
        ));
    }

    #[test]
    fn commit_is_permanent() {
        let mut e = entry();
        let lease = lease_of(e.acquire(OwnerToken::generate(), now()));
        assert!(e.commit(&lease, &forecast(1), now()).unwrap().is_committed());
        assert_eq!(e.forecast.as_ref().map(|f| f.status), Some(ForecastStatus::Committed));
        assert_eq!(e.acquire(OwnerToken::generate(), now()), AcquireResult::AlreadyCommitted);
        assert_eq!(
            e.commit(&lease, &forecast(1), now()).unwrap(),
            CommitResult::AlreadyCommitted
        );
        assert!(!e.close(Some(&lease), "canceled", now()));
    }

    #[test]
    fn stale_lease_cannot_commit_after_reacquire() {
        let policy = RetryPolicy::default();
        let mut e = entry();
        let owner = OwnerToken::generate();
        let first = lease_of(e.acquire(owner, now()));
        let release = e.release(
            &first,
            FailureRecord::new(1, FailureKind::DataNotReady, "odds missing", now()),
            &policy,
            now(),
        );
        assert!(matches!(release, ReleaseResult::Retry { .. }));

        let later = now() + chrono::Duration::minutes(5);
        let second = lease_of(e.acquire(owner, later));
        // Same owner and (refunded) attempt number, different lease.
        assert_eq!(second.attempt, first.attempt);
        assert_eq!(
            e.commit(&first, &forecast(1), later).unwrap(),
            CommitResult::LeaseLost
        );
        assert!(e.commit(&second, &forecast(1), later).unwrap().is_committed());
    }

    #[test]
    fn backoff_blocks_until_retry_at() {
        let policy = RetryPolicy::default();
        let mut e = entry();
        let lease = lease_of(e.acquire(OwnerToken::generate(), now()));
        let ReleaseResult::Retry { retry_at } = e.release(
            &lease,
            FailureRecord::new(1, FailureKind::Transient, "timeout", now()),
            &policy,
            now(),
        ) else {
            panic!("expected retry");
        };
        assert_eq!(retry_at, now() + chrono::Duration::seconds(60));
        assert!(matches!(
            e.acquire(OwnerToken::generate(), now()),
            AcquireResult::BackingOff { .. }
        ));
        assert!(e.acquire(OwnerToken::generate(), retry_at).is_acquired());
        assert_eq!(e.attempt_count, 2);
    }

    #[test]
    fn exhausted_attempts_dead_letter_and_keep_history() {
        let policy = RetryPolicy {
            base_backoff: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let mut e = entry();
        for attempt in 1..=3 {
            let lease = lease_of(e.acquire(OwnerToken::generate(), now()));
            let outcome = e.release(
                &lease,
                FailureRecord::new(attempt, FailureKind::Transient, "timeout", now()),
                &policy,
                now(),
            );
            assert_eq!(outcome.is_dead_lettered(), attempt == 3);
        }
        assert_eq!(e.terminal, Some(TerminalReason::AttemptsExhausted));
        assert_eq!(e.failures.len(), 3);
        assert!(!e.is_open());
        assert!(matches!(
            e.acquire(OwnerToken::generate(), now()),
            AcquireResult::DeadLettered { .. }
        ));
    }

    #[test]
    fn reclaim_treats_stale_lease_as_failure() {
        let policy = RetryPolicy::default();
        let mut e = entry();
        e.acquire(OwnerToken::generate(), now());
        let threshold = Duration::from_secs(240);

        assert!(e.reclaim(threshold, &policy, now() + chrono::Duration::seconds(239)).is_none());
        let reclaimed = e
            .reclaim(threshold, &policy, now() + chrono::Duration::seconds(240))
            .unwrap();
        assert!(matches!(reclaimed.outcome, ReleaseResult::Retry { .. }));
        assert_eq!(e.attempt_count, 1);
        assert_eq!(e.failures[0].kind, FailureKind::LeaseExpired);
    }

    #[test]
    fn close_requires_lease_while_in_progress() {
        let mut e = entry();
        let lease = lease_of(e.acquire(OwnerToken::generate(), now()));
        assert!(!e.close(None, "canceled", now()));
        assert!(e.close(Some(&lease), "canceled", now()));
        assert_eq!(e.terminal, Some(TerminalReason::EventWithdrawn));
        assert!(!e.close(Some(&lease), "canceled", now()));
    }
}
