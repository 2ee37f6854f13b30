//! In-memory idempotency ledger.
//!
//! Every operation runs under a single write lock, which makes each call
//! atomic across all events.
//!
//! ## Limitations
//!
//! - **NOT durable**: entries are lost when the process exits; use
//!   [`FileLedger`](super::file::FileLedger) when restarts must not re-run
//!   committed events
//! - **Single-process only**: scheduler instances must share the same value

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use tipoff_core::{EventId, OwnerToken};

use super::{
    AcquireResult, CommitResult, FailureRecord, IdempotencyLedger, Lease, LedgerEntry,
    LedgerTable, Reclaimed, ReleaseResult,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::forecast::ForecastRecord;
use crate::scheduler::retry::RetryPolicy;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// In-memory ledger for tests and single-process deployments.
///
/// ## Example
///
/// ```rust
/// use tipoff_flow::ledger::memory::InMemoryLedger;
/// use tipoff_flow::scheduler::retry::RetryPolicy;
///
/// let ledger = InMemoryLedger::new(RetryPolicy::default());
/// // Share one ledger (behind an `Arc`) between scheduler instances...
/// ```
#[derive(Debug)]
pub struct InMemoryLedger {
    table: RwLock<LedgerTable>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl InMemoryLedger {
    /// Creates an empty ledger applying `policy` on failures, timed by the wall clock.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            table: RwLock::new(LedgerTable::default()),
            policy,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock that stamps leases and retry deadlines.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn get(&self, event_id: &EventId) -> Result<Option<LedgerEntry>> {
        let table = self.table.read().map_err(poison_err)?;
        Ok(table.get(event_id))
    }

    async fn try_acquire(&self, event_id: &EventId, owner: OwnerToken) -> Result<AcquireResult> {
        let now = self.clock.now();
        let mut table = self.table.write().map_err(poison_err)?;
        let result = table.acquire(event_id, owner, now);
        drop(table);
        Ok(result)
    }

    async fn commit(&self, lease: &Lease, forecast: &ForecastRecord) -> Result<CommitResult> {
        let now = self.clock.now();
        let mut table = self.table.write().map_err(poison_err)?;
        let result = table.commit(lease, forecast, now);
        drop(table);
        result
    }

    async fn release_for_retry(
        &self,
        lease: &Lease,
        failure: FailureRecord,
    ) -> Result<ReleaseResult> {
        let now = self.clock.now();
        let mut table = self.table.write().map_err(poison_err)?;
        let result = table.release(lease, failure, &self.policy, now);
        drop(table);
        Ok(result)
    }

    async fn reclaim_stale(&self, threshold: Duration) -> Result<Vec<Reclaimed>> {
        let now = self.clock.now();
        let mut table = self.table.write().map_err(poison_err)?;
        let reclaimed = table.reclaim_stale(threshold, &self.policy, now);
        drop(table);
        Ok(reclaimed)
    }

    async fn close(
        &self,
        event_id: &EventId,
        lease: Option<&Lease>,
        reason: &str,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut table = self.table.write().map_err(poison_err)?;
        let closed = table.close(event_id, lease, reason, now);
        drop(table);
        Ok(closed)
    }

    async fn open_entries(&self) -> Result<Vec<LedgerEntry>> {
        let table = self.table.read().map_err(poison_err)?;
        Ok(table.open_entries())
    }

    async fn unpublished_commits(&self) -> Result<Vec<ForecastRecord>> {
        let table = self.table.read().map_err(poison_err)?;
        Ok(table.unpublished_commits())
    }

    async fn mark_published(&self, event_id: &EventId) -> Result<bool> {
        let now = self.clock.now();
        let mut table = self.table.write().map_err(poison_err)?;
        let marked = table.mark_published(event_id, now);
        drop(table);
        Ok(marked)
    }
}
