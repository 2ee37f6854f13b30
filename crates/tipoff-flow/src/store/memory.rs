//! In-memory persistence gateway for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability
//! - **No persistence**: All state is lost when the process exits

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use tipoff_core::EventId;

use super::PersistenceGateway;
use crate::error::{Error, Result};
use crate::forecast::ForecastRecord;
use crate::ledger::LedgerEntry;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// In-memory gateway.
///
/// Can be told to fail forecast writes, which simulates a crash between the
/// ledger commit and the forecast write.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    forecasts: RwLock<BTreeMap<EventId, ForecastRecord>>,
    ledger: RwLock<BTreeMap<EventId, LedgerEntry>>,
    fail_forecast_writes: AtomicBool,
    forecast_writes: AtomicUsize,
}

impl InMemoryGateway {
    /// Creates an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes forecast writes fail (or succeed again).
    pub fn set_fail_forecast_writes(&self, fail: bool) {
        self.fail_forecast_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful forecast writes (upserts included).
    #[must_use]
    pub fn forecast_writes(&self) -> usize {
        self.forecast_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn save_forecast(&self, forecast: &ForecastRecord) -> Result<()> {
        if self.fail_forecast_writes.load(Ordering::SeqCst) {
            return Err(Error::storage("forecast write rejected"));
        }
        let mut forecasts = self.forecasts.write().map_err(poison_err)?;
        forecasts.insert(forecast.event_id.clone(), forecast.clone());
        drop(forecasts);
        self.forecast_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_forecast(&self, event_id: &EventId) -> Result<Option<ForecastRecord>> {
        let forecasts = self.forecasts.read().map_err(poison_err)?;
        Ok(forecasts.get(event_id).cloned())
    }

    async fn list_forecasts(&self) -> Result<Vec<ForecastRecord>> {
        let forecasts = self.forecasts.read().map_err(poison_err)?;
        Ok(forecasts.values().cloned().collect())
    }

    async fn save_ledger_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let mut ledger = self.ledger.write().map_err(poison_err)?;
        ledger.insert(entry.event_id.clone(), entry.clone());
        drop(ledger);
        Ok(())
    }

    async fn get_ledger_entry(&self, event_id: &EventId) -> Result<Option<LedgerEntry>> {
        let ledger = self.ledger.read().map_err(poison_err)?;
        Ok(ledger.get(event_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::forecast::{ForecastStatus, OutcomeLabel};

    fn record(rationale: &str) -> ForecastRecord {
        ForecastRecord {
            event_id: EventId::new("g1").unwrap(),
            outcome: OutcomeLabel::Home,
            confidence: 0.6,
            raw_confidence: 0.6,
            rationale: rationale.into(),
            model_id: "scripted".into(),
            snapshot_version: 1,
            attempt: 1,
            context_gaps: Vec::new(),
            created_at: Utc::now(),
            status: ForecastStatus::Committed,
        }
    }

    #[tokio::test]
    async fn save_forecast_overwrites_by_event_id() -> Result<()> {
        let gateway = InMemoryGateway::new();
        gateway.save_forecast(&record("first")).await?;
        gateway.save_forecast(&record("second")).await?;

        let all = gateway.list_forecasts().await?;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].rationale, "second");
        assert_eq!(gateway.forecast_writes(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn failing_writes_leave_nothing_behind() -> Result<()> {
        let gateway = InMemoryGateway::new();
        gateway.set_fail_forecast_writes(true);
        assert!(gateway.save_forecast(&record("x")).await.is_err());
        assert!(gateway.get_forecast(&EventId::new("g1")?).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn ledger_mirror_upserts() -> Result<()> {
        let gateway = InMemoryGateway::new();
        let id = EventId::new("g1")?;
        let mut entry = LedgerEntry::new(id.clone(), Utc::now());
        gateway.save_ledger_entry(&entry).await?;
        entry.attempt_count = 2;
        gateway.save_ledger_entry(&entry).await?;
        assert_eq!(
            gateway.get_ledger_entry(&id).await?.map(|e| e.attempt_count),
            Some(2)
        );
        Ok(())
    }
}
