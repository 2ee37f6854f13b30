//! File-backed idempotency ledger.
//!
//! The whole ledger lives in one JSON snapshot. Every mutating call applies
//! the [`LedgerEntry`] rules to a copy of the table, writes the copy to a
//! temporary file, renames it over the snapshot, and only then makes it
//! visible. A call that returns has therefore reached disk, and a crash
//! leaves either the old snapshot or the new one.
//!
//! Each snapshot carries a version. A write only proceeds if the file still
//! holds the version this process last wrote or loaded, the same
//! compare-and-swap shape as an object-store generation match. A second
//! process writing the same file is reported as a storage error instead of
//! being silently overwritten.
//!
//! ## Limitations
//!
//! - **Single writer**: one process owns the file; scheduler instances in
//!   that process share one `FileLedger`
//! - Every mutation rewrites the full snapshot

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use tipoff_core::{EventId, OwnerToken};

use super::{
    AcquireResult, CommitResult, FailureRecord, IdempotencyLedger, Lease, LedgerEntry,
    LedgerTable, Reclaimed, ReleaseResult,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::forecast::ForecastRecord;
use crate::scheduler::retry::RetryPolicy;

/// On-disk snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerSnapshot {
    version: u64,
    entries: Vec<LedgerEntry>,
}

#[derive(Debug)]
struct Loaded {
    table: LedgerTable,
    version: u64,
}

/// Ledger persisted to a JSON snapshot file.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    state: Mutex<Loaded>,
}

impl FileLedger {
    /// Opens the ledger at `path`, loading the snapshot if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file cannot be read and
    /// [`Error::Serialization`] if it is not a ledger snapshot.
    pub async fn open(path: impl Into<PathBuf>, policy: RetryPolicy) -> Result<Self> {
        let path = path.into();
        let loaded = match read_snapshot(&path).await? {
            Some(snapshot) => {
                info!(
                    path = %path.display(),
                    version = snapshot.version,
                    entries = snapshot.entries.len(),
                    "loaded ledger snapshot"
                );
                Loaded {
                    table: LedgerTable::from_entries(snapshot.entries),
                    version: snapshot.version,
                }
            }
            None => {
                info!(path = %path.display(), "starting empty ledger");
                Loaded {
                    table: LedgerTable::default(),
                    version: 0,
                }
            }
        };
        Ok(Self {
            path,
            policy,
            clock: Arc::new(SystemClock),
            state: Mutex::new(loaded),
        })
    }

    /// Replaces the clock that stamps leases and retry deadlines.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the snapshot path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the version of the last snapshot written or loaded.
    pub async fn version(&self) -> u64 {
        self.state.lock().await.version
    }

    /// Applies `op` to a copy of the table and persists the copy if it changed.
    async fn mutate<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut LedgerTable, DateTime<Utc>) -> Result<T> + Send,
    {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let mut next = state.table.clone();
        let value = op(&mut next, now)?;
        if next != state.table {
            let version = state.version + 1;
            self.write_snapshot(state.version, version, &next).await?;
            state.table = next;
            state.version = version;
        }
        drop(state);
        Ok(value)
    }

    async fn write_snapshot(&self, expected: u64, version: u64, table: &LedgerTable) -> Result<()> {
        let on_disk = read_snapshot(&self.path).await?.map_or(0, |s| s.version);
        if on_disk != expected {
            return Err(Error::storage(format!(
                "ledger {} changed underneath: expected version {expected}, found {on_disk}",
                self.path.display()
            )));
        }

        let snapshot = LedgerSnapshot {
            version,
            entries: table.all(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let mut tmp = self.path.clone();
        tmp.set_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| {
            Error::storage_with_source(format!("failed to write {}", tmp.display()), e)
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::storage_with_source(format!("failed to replace {}", self.path.display()), e)
        })?;
        debug!(path = %self.path.display(), version, "ledger snapshot written");
        Ok(())
    }
}

async fn read_snapshot(path: &Path) -> Result<Option<LedgerSnapshot>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::storage_with_source(
                format!("failed to read {}", path.display()),
                e,
            ));
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::Serialization {
            message: format!("invalid ledger snapshot {}: {e}", path.display()),
        })
}

#[async_trait]
impl IdempotencyLedger for FileLedger {
    async fn get(&self, event_id: &EventId) -> Result<Option<LedgerEntry>> {
        Ok(self.state.lock().await.table.get(event_id))
    }

    async fn try_acquire(&self, event_id: &EventId, owner: OwnerToken) -> Result<AcquireResult> {
        self.mutate(|table, now| Ok(table.acquire(event_id, owner, now)))
            .await
    }

    async fn commit(&self, lease: &Lease, forecast: &ForecastRecord) -> Result<CommitResult> {
        self.mutate(|table, now| table.commit(lease, forecast, now))
            .await
    }

    async fn release_for_retry(
        &self,
        lease: &Lease,
        failure: FailureRecord,
    ) -> Result<ReleaseResult> {
        let policy = &self.policy;
        self.mutate(|table, now| Ok(table.release(lease, failure, policy, now)))
            .await
    }

    async fn reclaim_stale(&self, threshold: Duration) -> Result<Vec<Reclaimed>> {
        let policy = &self.policy;
        self.mutate(|table, now| Ok(table.reclaim_stale(threshold, policy, now)))
            .await
    }

    async fn close(
        &self,
        event_id: &EventId,
        lease: Option<&Lease>,
        reason: &str,
    ) -> Result<bool> {
        self.mutate(|table, now| Ok(table.close(event_id, lease, reason, now)))
            .await
    }

    async fn open_entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.state.lock().await.table.open_entries())
    }

    async fn unpublished_commits(&self) -> Result<Vec<ForecastRecord>> {
        Ok(self.state.lock().await.table.unpublished_commits())
    }

    async fn mark_published(&self, event_id: &EventId) -> Result<bool> {
        self.mutate(|table, now| Ok(table.mark_published(event_id, now)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clock::ManualClock;
    use crate::error::FailureKind;
    use crate::forecast::{ForecastStatus, OutcomeLabel};
    use crate::ledger::LedgerState;

    fn now() -> DateTime<Utc> {
        "2024-11-02T22:30:00Z".parse().unwrap()
    }

    fn event() -> EventId {
        EventId::new("g1").unwrap()
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("tipoff-ledger-{}.json", ulid::Ulid::new()))
    }

    fn forecast() -> ForecastRecord {
        ForecastRecord {
            event_id: event(),
            outcome: OutcomeLabel::Away,
            confidence: 0.57,
            raw_confidence: 0.57,
            rationale: "Road form.".into(),
            model_id: "scripted".into(),
            snapshot_version: 1,
            attempt: 1,
            context_gaps: Vec::new(),
            created_at: now(),
            status: ForecastStatus::Pending,
        }
    }

    async fn open(path: &Path, clock: &Arc<ManualClock>) -> Result<FileLedger> {
        Ok(FileLedger::open(path, RetryPolicy::default())
            .await?
            .with_clock(clock.clone()))
    }

    fn lease_of(result: AcquireResult) -> Lease {
        match result {
            AcquireResult::Acquired(lease) => lease,
            other => panic!("expected lease, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn committed_entry_survives_reopen() -> Result<()> {
        let path = temp_path();
        let clock = Arc::new(ManualClock::new(now()));
        let ledger = open(&path, &clock).await?;
        let lease = lease_of(ledger.try_acquire(&event(), OwnerToken::generate()).await?);
        assert!(ledger.commit(&lease, &forecast()).await?.is_committed());
        assert!(ledger.mark_published(&event()).await?);
        drop(ledger);

        let reopened = open(&path, &clock).await?;
        let entry = reopened.get(&event()).await?.unwrap();
        assert_eq!(entry.state, LedgerState::Committed);
        assert!(entry.published);
        assert_eq!(
            entry.forecast.map(|f| f.rationale),
            Some("Road form.".to_string())
        );
        assert_eq!(
            reopened.try_acquire(&event(), OwnerToken::generate()).await?,
            AcquireResult::AlreadyCommitted
        );
        assert_eq!(reopened.version().await, 3);

        tokio::fs::remove_file(&path).await.ok();
        Ok(())
    }

    #[tokio::test]
    async fn lease_of_crashed_process_is_reclaimed_after_reopen() -> Result<()> {
        let path = temp_path();
        let clock = Arc::new(ManualClock::new(now()));
        let crashed = open(&path, &clock).await?;
        crashed.try_acquire(&event(), OwnerToken::generate()).await?;
        drop(crashed);

        let ledger = open(&path, &clock).await?;
        let threshold = Duration::from_secs(240);
        assert!(ledger.reclaim_stale(threshold).await?.is_empty());
        clock.advance(threshold);
        let reclaimed = ledger.reclaim_stale(threshold).await?;
        assert_eq!(reclaimed.len(), 1);
        let entry = ledger.get(&event()).await?.unwrap();
        assert_eq!(entry.failures[0].kind, FailureKind::LeaseExpired);
        assert_eq!(entry.attempt_count, 1);

        tokio::fs::remove_file(&path).await.ok();
        Ok(())
    }

    #[tokio::test]
    async fn unchanged_table_is_not_rewritten() -> Result<()> {
        let path = temp_path();
        let clock = Arc::new(ManualClock::new(now()));
        let ledger = open(&path, &clock).await?;
        ledger.try_acquire(&event(), OwnerToken::generate()).await?;
        assert_eq!(ledger.version().await, 1);

        let second = ledger.try_acquire(&event(), OwnerToken::generate()).await?;
        assert!(matches!(second, AcquireResult::AlreadyLeased { .. }));
        assert!(ledger.reclaim_stale(Duration::from_secs(240)).await?.is_empty());
        assert!(!ledger.mark_published(&event()).await?);
        assert_eq!(ledger.version().await, 1);

        tokio::fs::remove_file(&path).await.ok();
        Ok(())
    }

    #[tokio::test]
    async fn second_writer_is_rejected() -> Result<()> {
        let path = temp_path();
        let clock = Arc::new(ManualClock::new(now()));
        let first = open(&path, &clock).await?;
        let second = open(&path, &clock).await?;

        first.try_acquire(&event(), OwnerToken::generate()).await?;
        let err = second
            .try_acquire(&event(), OwnerToken::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
        assert!(err.to_string().contains("changed underneath"));
        assert!(second.get(&event()).await?.is_none());

        tokio::fs::remove_file(&path).await.ok();
        Ok(())
    }

    #[tokio::test]
    async fn malformed_snapshot_is_rejected() {
        let path = temp_path();
        tokio::fs::write(&path, "{ not json").await.unwrap();
        let err = FileLedger::open(&path, RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
        tokio::fs::remove_file(&path).await.ok();
    }
}
