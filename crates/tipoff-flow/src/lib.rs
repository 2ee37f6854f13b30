//! # tipoff-flow
//!
//! Prediction workflow orchestrator for scheduled sporting events.
//!
//! Shortly before each event starts, the orchestrator assembles the facts
//! known about it, asks a text-generation model for a forecast, validates
//! the answer, and commits exactly one forecast per event.
//!
//! - **Registry**: last known-good view of upcoming events
//! - **Context assembly**: freshness-checked snapshot of stats, odds and news
//! - **Generation**: one bounded model call per attempt, validated output
//! - **Ledger**: atomic leases and permanent commits per event, in memory or
//!   persisted to a snapshot file
//! - **Scheduler**: periodic ticks, bounded worker pool, retry and dead-letter
//!
//! ## Guarantees
//!
//! - **At most one committed forecast per event**, even with several
//!   scheduler instances sharing a ledger
//! - **No premature trigger**: nothing is generated before
//!   `start_time - lead_time`
//! - **Bounded retries**: every event ends committed or dead-lettered
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use chrono::Utc;
//! use tipoff_flow::context::{AssemblerConfig, ContextAssembler};
//! use tipoff_flow::error::Result;
//! use tipoff_flow::generation::GenerationClient;
//! use tipoff_flow::generation::scripted::ScriptedGenerator;
//! use tipoff_flow::ledger::memory::InMemoryLedger;
//! use tipoff_flow::registry::EventRegistry;
//! use tipoff_flow::scheduler::{SchedulerConfig, TriggerScheduler};
//! use tipoff_flow::sources::memory::{InMemoryDataStore, InMemoryEventSource};
//! use tipoff_flow::store::memory::InMemoryGateway;
//!
//! # async fn demo() -> Result<()> {
//! let events = Arc::new(InMemoryEventSource::new());
//! let data = Arc::new(InMemoryDataStore::new());
//! let registry = Arc::new(EventRegistry::new(events, Duration::from_secs(10)));
//! registry.refresh(Utc::now()).await?;
//!
//! let scheduler = TriggerScheduler::new(
//!     SchedulerConfig::default(),
//!     registry,
//!     Arc::new(ContextAssembler::new(data.clone(), data, AssemblerConfig::default())),
//!     Arc::new(GenerationClient::new(
//!         Arc::new(ScriptedGenerator::always(
//!             r#"{"pick": "home", "confidence": 0.6, "rationale": "Rest edge."}"#,
//!         )),
//!         Duration::from_secs(60),
//!     )),
//!     Arc::new(InMemoryLedger::default()),
//!     Arc::new(InMemoryGateway::new()),
//! );
//! let summary = scheduler.run_once(Utc::now()).await?;
//! println!("committed {}", summary.committed);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod facts;
pub mod forecast;
pub mod generation;
pub mod ledger;
pub mod metrics;
pub mod prompt;
pub mod registry;
pub mod scheduler;
pub mod sources;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::OrchestratorConfig;
    pub use crate::context::{ContextAssembler, ContextGap, GenerationRequest};
    pub use crate::error::{Error, FailureKind, Result};
    pub use crate::event::{Event, EventStatus, Participant};
    pub use crate::forecast::{ForecastRecord, ForecastStatus, OutcomeLabel};
    pub use crate::generation::{GenerationClient, TextGenerator};
    pub use crate::ledger::{AcquireResult, IdempotencyLedger, LedgerEntry, LedgerState};
    pub use crate::metrics::FlowMetrics;
    pub use crate::registry::EventRegistry;
    pub use crate::scheduler::{SchedulerConfig, TickSummary, TriggerScheduler};
    pub use crate::sources::{EventSource, NewsStore, StructuredDataStore};
    pub use crate::store::PersistenceGateway;
}

/// Converts a std duration for date arithmetic, saturating on overflow.
pub(crate) fn signed(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
