//! Persistence gateway for committed forecasts and ledger audit rows.
//!
//! The gateway is downstream of the ledger: a forecast is written here only
//! after the ledger accepted its commit. Writes are idempotent upserts keyed
//! by event ID, so re-publishing after a crash overwrites rather than
//! duplicates.

pub mod memory;

use async_trait::async_trait;

use tipoff_core::EventId;

use crate::error::Result;
use crate::forecast::ForecastRecord;
use crate::ledger::LedgerEntry;

/// Storage abstraction for forecasts and ledger mirrors.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from worker tasks.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Upserts a forecast keyed by its event ID.
    async fn save_forecast(&self, forecast: &ForecastRecord) -> Result<()>;

    /// Gets the stored forecast for an event.
    async fn get_forecast(&self, event_id: &EventId) -> Result<Option<ForecastRecord>>;

    /// Lists stored forecasts ordered by event ID.
    async fn list_forecasts(&self) -> Result<Vec<ForecastRecord>>;

    /// Upserts the audit mirror of a ledger entry.
    async fn save_ledger_entry(&self, entry: &LedgerEntry) -> Result<()>;

    /// Gets the audit mirror of a ledger entry.
    async fn get_ledger_entry(&self, event_id: &EventId) -> Result<Option<LedgerEntry>>;
}
