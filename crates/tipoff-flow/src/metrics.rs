//! Observability metrics for forecast orchestration.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `tipoff_flow_tick_duration_seconds` | Histogram | - | Scheduler tick processing time |
//! | `tipoff_flow_events_total` | Counter | `outcome` | Per-event pipeline outcomes |
//! | `tipoff_flow_lease_acquisitions_total` | Counter | `result` | Lease acquisition results |
//! | `tipoff_flow_generation_duration_seconds` | Histogram | `result` | Generation call latency |
//! | `tipoff_flow_dead_letters_total` | Counter | `kind` | Events whose budget ran out |
//! | `tipoff_flow_registry_refreshes_total` | Counter | `result` | Registry refresh outcomes |
//! | `tipoff_flow_stale_leases_reclaimed_total` | Counter | - | Stale leases reclaimed |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tipoff_flow::metrics::FlowMetrics;
//!
//! let metrics = FlowMetrics::new();
//! metrics.record_event_outcome("committed");
//! metrics.record_lease_acquisition("acquired");
//! ```
//!
//! Metrics go through the `metrics` crate facade; installing an exporter
//! is up to the embedding process.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Histogram: Scheduler tick processing time in seconds.
    pub const TICK_DURATION_SECONDS: &str = "tipoff_flow_tick_duration_seconds";
    /// Counter: Per-event pipeline outcomes.
    pub const EVENTS_TOTAL: &str = "tipoff_flow_events_total";
    /// Counter: Lease acquisition results.
    pub const LEASE_ACQUISITIONS_TOTAL: &str = "tipoff_flow_lease_acquisitions_total";
    /// Histogram: Generation call latency in seconds.
    pub const GENERATION_DURATION_SECONDS: &str = "tipoff_flow_generation_duration_seconds";
    /// Counter: Dead-lettered events.
    pub const DEAD_LETTERS_TOTAL: &str = "tipoff_flow_dead_letters_total";
    /// Counter: Registry refresh outcomes.
    pub const REGISTRY_REFRESHES_TOTAL: &str = "tipoff_flow_registry_refreshes_total";
    /// Counter: Stale leases reclaimed.
    pub const STALE_LEASES_RECLAIMED_TOTAL: &str = "tipoff_flow_stale_leases_reclaimed_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Pipeline outcome (committed, retry, dead_lettered, withdrawn, skipped, lease_lost, crashed).
    pub const OUTCOME: &str = "outcome";
    /// Result status (acquired, already_leased, ok, error, ...).
    pub const RESULT: &str = "result";
    /// Failure kind.
    pub const KIND: &str = "kind";
}

/// High-level interface for recording orchestration metrics.
///
/// Cheap to clone and share across worker tasks.
#[derive(Debug, Clone, Default)]
pub struct FlowMetrics;

impl FlowMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records scheduler tick duration.
    pub fn observe_tick_duration(&self, duration: Duration) {
        histogram!(names::TICK_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Records the outcome of one event's pipeline.
    pub fn record_event_outcome(&self, outcome: &str) {
        counter!(
            names::EVENTS_TOTAL,
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
    }

    /// Records a lease acquisition attempt.
    pub fn record_lease_acquisition(&self, result: &str) {
        counter!(
            names::LEASE_ACQUISITIONS_TOTAL,
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records generation call latency.
    pub fn observe_generation_duration(&self, result: &str, duration: Duration) {
        histogram!(
            names::GENERATION_DURATION_SECONDS,
            labels::RESULT => result.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Records an event whose attempt budget ran out.
    pub fn record_dead_letter(&self, kind: &str) {
        counter!(
            names::DEAD_LETTERS_TOTAL,
            labels::KIND => kind.to_string(),
        )
        .increment(1);
    }

    /// Records a registry refresh outcome.
    pub fn record_registry_refresh(&self, result: &str) {
        counter!(
            names::REGISTRY_REFRESHES_TOTAL,
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records reclaimed stale leases.
    pub fn record_reclaimed(&self, count: usize) {
        counter!(names::STALE_LEASES_RECLAIMED_TOTAL).increment(count as u64);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
///
/// ## Example
///
/// ```rust,no_run
/// use tipoff_flow::metrics::{FlowMetrics, TimingGuard};
///
/// let metrics = FlowMetrics::new();
///
/// {
///     let _guard = TimingGuard::new(|duration| {
///         metrics.observe_tick_duration(duration);
///     });
///
///     // Do work...
/// } // Duration recorded automatically on drop
/// ```
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
