//! Trigger scheduler: turns due events into committed forecasts.
//!
//! Each tick runs in order:
//!
//! 1. re-publish committed forecasts that never reached the gateway
//! 2. reclaim stale leases
//! 3. close open entries whose event left `scheduled` or already started
//! 4. list due events, earliest start first
//! 5. dispatch them into a bounded worker pool
//!
//! A worker owns one event for the duration of its lease:
//! acquire, assemble, generate, revalidate, commit, publish. Every failure
//! goes back to the ledger, which decides between retry and dead-letter.
//! Several scheduler instances may share one ledger; the lease guarantees
//! each event is worked by at most one of them at a time.

pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use tipoff_core::{EventId, OwnerToken, forecast_span};

use crate::config::OrchestratorConfig;
use crate::context::ContextAssembler;
use crate::error::{Error, FailureKind, Result};
use crate::event::Event;
use crate::forecast::ForecastRecord;
use crate::generation::GenerationClient;
use crate::ledger::{
    AcquireResult, CommitResult, FailureRecord, IdempotencyLedger, Lease, ReleaseResult,
};
use crate::metrics::{FlowMetrics, TimingGuard};
use crate::registry::EventRegistry;
use crate::store::PersistenceGateway;

/// Scheduler timing and pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Offset before start at which an event becomes due.
    pub lead_time: Duration,
    /// Tick cadence for [`TriggerScheduler::run`].
    pub tick_interval: Duration,
    /// Worker pool bound.
    pub max_concurrency: usize,
    /// Lease age after which a lease is reclaimed.
    pub stale_lease_threshold: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for SchedulerConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            lead_time: config.lead_time,
            tick_interval: config.tick_interval,
            max_concurrency: config.max_concurrency,
            stale_lease_threshold: config.stale_lease_threshold,
        }
    }
}

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Due events found this tick.
    pub due: usize,
    /// Leases acquired.
    pub attempted: usize,
    /// Forecasts committed.
    pub committed: usize,
    /// Leases released after a failure (retry or dead-letter).
    pub failed: usize,
    /// Due events not acquired (leased elsewhere, committed, backing off, dead-lettered).
    pub skipped: usize,
    /// Released leases that became terminal.
    pub dead_lettered: usize,
    /// Stale leases reclaimed.
    pub reclaimed: usize,
    /// Committed forecasts re-published.
    pub republished: usize,
    /// Entries closed because the event left `scheduled`.
    pub withdrawn: usize,
    /// Workers that panicked or were aborted; their leases are left for reclaim.
    pub crashed: usize,
}

/// What one worker did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerOutcome {
    NotAcquired,
    Committed,
    Failed { dead_lettered: bool },
    Withdrawn,
    LeaseLost,
    Crashed,
}

impl WorkerOutcome {
    const fn as_label(self) -> &'static str {
        match self {
            Self::NotAcquired => "skipped",
            Self::Committed => "committed",
            Self::Failed {
                dead_lettered: false,
            } => "retry",
            Self::Failed {
                dead_lettered: true,
            } => "dead_lettered",
            Self::Withdrawn => "withdrawn",
            Self::LeaseLost => "lease_lost",
            Self::Crashed => "crashed",
        }
    }
}

impl TickSummary {
    fn record(&mut self, outcome: WorkerOutcome) {
        if !matches!(outcome, WorkerOutcome::NotAcquired | WorkerOutcome::Crashed) {
            self.attempted += 1;
        }
        match outcome {
            WorkerOutcome::NotAcquired => self.skipped += 1,
            WorkerOutcome::Committed => self.committed += 1,
            WorkerOutcome::Failed { dead_lettered } => {
                self.failed += 1;
                if dead_lettered {
                    self.dead_lettered += 1;
                }
            }
            WorkerOutcome::Withdrawn => self.withdrawn += 1,
            WorkerOutcome::LeaseLost => {}
            WorkerOutcome::Crashed => self.crashed += 1,
        }
    }
}

/// Collaborators shared by every worker.
struct Pipeline {
    owner: OwnerToken,
    registry: Arc<EventRegistry>,
    assembler: Arc<ContextAssembler>,
    generation: Arc<GenerationClient>,
    ledger: Arc<dyn IdempotencyLedger>,
    gateway: Arc<dyn PersistenceGateway>,
    metrics: FlowMetrics,
}

/// Drives due events through generation on a fixed tick.
pub struct TriggerScheduler {
    config: SchedulerConfig,
    pipeline: Arc<Pipeline>,
}

impl std::fmt::Debug for TriggerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerScheduler")
            .field("config", &self.config)
            .field("owner", &self.pipeline.owner)
            .finish_non_exhaustive()
    }
}

impl TriggerScheduler {
    /// Creates a scheduler with a freshly generated owner token.
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<EventRegistry>,
        assembler: Arc<ContextAssembler>,
        generation: Arc<GenerationClient>,
        ledger: Arc<dyn IdempotencyLedger>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        Self {
            config,
            pipeline: Arc::new(Pipeline {
                owner: OwnerToken::generate(),
                registry,
                assembler,
                generation,
                ledger,
                gateway,
                metrics: FlowMetrics::new(),
            }),
        }
    }

    /// Returns the token this instance acquires leases with.
    #[must_use]
    pub fn owner(&self) -> OwnerToken {
        self.pipeline.owner
    }

    /// Returns the scheduler configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Runs one tick evaluated at `as_of`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger or registry cannot be read. Per-event
    /// failures never fail the tick.
    #[tracing::instrument(skip(self), fields(owner = %self.pipeline.owner))]
    pub async fn run_once(&self, as_of: DateTime<Utc>) -> Result<TickSummary> {
        let metrics = self.pipeline.metrics.clone();
        let timer = TimingGuard::new(move |d| metrics.observe_tick_duration(d));
        let mut summary = TickSummary {
            republished: self.republish().await?,
            ..TickSummary::default()
        };

        let reclaimed = self
            .pipeline
            .ledger
            .reclaim_stale(self.config.stale_lease_threshold)
            .await?;
        for r in &reclaimed {
            warn!(
                event_id = %r.event_id,
                previous_owner = ?r.previous_owner,
                outcome = ?r.outcome,
                "reclaimed stale lease"
            );
            if let ReleaseResult::DeadLettered { reason } = r.outcome {
                self.pipeline.metrics.record_dead_letter(reason.as_label());
            }
            self.pipeline.mirror(&r.event_id).await;
        }
        summary.reclaimed = reclaimed.len();
        self.pipeline.metrics.record_reclaimed(reclaimed.len());

        summary.withdrawn += self.close_withdrawn(as_of).await?;

        let due: Vec<Event> = self
            .pipeline
            .registry
            .list_due_events(as_of, self.config.lead_time)?
            .into_iter()
            .filter(|e| !e.has_started_by(as_of))
            .collect();
        summary.due = due.len();

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut workers = JoinSet::new();
        for event in due {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| Error::transient("worker pool closed"))?;
            let pipeline = Arc::clone(&self.pipeline);
            let span = forecast_span("process_event", event.id.as_str());
            workers.spawn(
                async move {
                    let outcome = pipeline.process(event, as_of).await;
                    drop(permit);
                    outcome
                }
                .instrument(span),
            );
        }

        while let Some(joined) = workers.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => {
                    error!(error = %err, "worker panicked; lease left for reclaim");
                    WorkerOutcome::Crashed
                }
                Err(err) => {
                    error!(error = %err, "worker aborted; lease left for reclaim");
                    WorkerOutcome::Crashed
                }
            };
            self.pipeline.metrics.record_event_outcome(outcome.as_label());
            summary.record(outcome);
        }

        info!(
            due = summary.due,
            attempted = summary.attempted,
            committed = summary.committed,
            failed = summary.failed,
            skipped = summary.skipped,
            dead_lettered = summary.dead_lettered,
            reclaimed = summary.reclaimed,
            republished = summary.republished,
            withdrawn = summary.withdrawn,
            crashed = summary.crashed,
            elapsed_ms = u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX),
            "tick complete"
        );
        Ok(summary)
    }

    /// Ticks every `tick_interval` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(owner = %self.pipeline.owner, "scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once(Utc::now()).await {
                        error!(error = %err, "scheduler tick failed");
                    }
                }
            }
        }
    }

    async fn republish(&self) -> Result<usize> {
        let mut republished = 0;
        for forecast in self.pipeline.ledger.unpublished_commits().await? {
            if self.pipeline.publish(&forecast).await {
                info!(event_id = %forecast.event_id, "re-published committed forecast");
                republished += 1;
            }
        }
        Ok(republished)
    }

    async fn close_withdrawn(&self, as_of: DateTime<Utc>) -> Result<usize> {
        let mut closed = 0;
        for entry in self.pipeline.ledger.open_entries().await? {
            let Some(event) = self.pipeline.registry.get(&entry.event_id)? else {
                continue;
            };
            if event.is_scheduled() && !event.has_started_by(as_of) {
                continue;
            }
            let reason = withdrawal_reason(&event, as_of);
            if self
                .pipeline
                .ledger
                .close(&entry.event_id, None, &reason)
                .await?
            {
                info!(event_id = %entry.event_id, reason = %reason, "closed withdrawn event");
                self.pipeline.mirror(&entry.event_id).await;
                closed += 1;
            }
        }
        Ok(closed)
    }
}

fn withdrawal_reason(event: &Event, as_of: DateTime<Utc>) -> String {
    if event.is_scheduled() {
        format!("event started at {} before as_of {as_of}", event.start_time)
    } else {
        format!("event is {}", event.status)
    }
}

impl Pipeline {
    async fn process(&self, event: Event, as_of: DateTime<Utc>) -> WorkerOutcome {
        let acquired = match self.ledger.try_acquire(&event.id, self.owner).await {
            Ok(acquired) => acquired,
            Err(err) => {
                warn!(error = %err, "lease acquisition failed");
                self.metrics.record_lease_acquisition("error");
                return WorkerOutcome::NotAcquired;
            }
        };
        let label = acquired.as_label();
        self.metrics.record_lease_acquisition(label);
        let AcquireResult::Acquired(lease) = acquired else {
            debug!(result = label, "event not acquired");
            return WorkerOutcome::NotAcquired;
        };
        self.mirror(&event.id).await;
        debug!(attempt = lease.attempt, "lease acquired");

        match self.attempt(&event, &lease, as_of).await {
            Ok(outcome) => outcome,
            Err(err) => self.fail(&lease, &err).await,
        }
    }

    async fn attempt(
        &self,
        event: &Event,
        lease: &Lease,
        as_of: DateTime<Utc>,
    ) -> Result<WorkerOutcome> {
        let request = self.assembler.assemble(event).await?;
        let forecast = self.generation.generate(&request, lease.attempt, as_of).await?;

        let current = self
            .registry
            .revalidate(&event.id)
            .await?
            .ok_or_else(|| Error::EventNotFound {
                event_id: event.id.clone(),
            })?;
        if !current.is_scheduled() || current.has_started_by(as_of) {
            return Ok(self
                .withdraw(lease, &withdrawal_reason(&current, as_of))
                .await);
        }

        match self.ledger.commit(lease, &forecast).await? {
            CommitResult::Committed => {}
            other => {
                warn!(result = ?other, "commit rejected; discarding forecast");
                return Ok(WorkerOutcome::LeaseLost);
            }
        }
        info!(
            outcome = %forecast.outcome,
            confidence = forecast.confidence,
            reduced_context = forecast.is_reduced_context(),
            "forecast committed"
        );
        self.mirror(&event.id).await;

        let committed = forecast.committed()?;
        self.publish(&committed).await;
        Ok(WorkerOutcome::Committed)
    }

    async fn fail(&self, lease: &Lease, err: &Error) -> WorkerOutcome {
        let kind = err.failure_kind();
        if kind == FailureKind::EventWithdrawn {
            return self.withdraw(lease, &err.to_string()).await;
        }
        // The ledger restamps the failure time from its own clock.
        let failure = FailureRecord::new(lease.attempt, kind, err.to_string(), lease.acquired_at);
        let released = match self.ledger.release_for_retry(lease, failure).await {
            Ok(released) => released,
            Err(release_err) => {
                error!(error = %release_err, cause = %err, "lease release failed; left for reclaim");
                return WorkerOutcome::Failed {
                    dead_lettered: false,
                };
            }
        };
        self.mirror(&lease.event_id).await;
        match released {
            ReleaseResult::Retry { retry_at } => {
                warn!(kind = %kind, error = %err, retry_at = %retry_at, "attempt failed; will retry");
                WorkerOutcome::Failed {
                    dead_lettered: false,
                }
            }
            ReleaseResult::DeadLettered { reason } => {
                let terminal = Error::Terminal {
                    event_id: lease.event_id.clone(),
                    attempts: lease.attempt,
                };
                error!(kind = %kind, error = %err, reason = %reason, "{terminal}; dead-lettered");
                self.metrics.record_dead_letter(reason.as_label());
                WorkerOutcome::Failed {
                    dead_lettered: true,
                }
            }
            ReleaseResult::LeaseLost => {
                warn!(error = %err, "lease lost before release");
                WorkerOutcome::LeaseLost
            }
        }
    }

    async fn withdraw(&self, lease: &Lease, reason: &str) -> WorkerOutcome {
        match self.ledger.close(&lease.event_id, Some(lease), reason).await {
            Ok(true) => {
                info!(reason = %reason, "event withdrawn; forecast discarded");
                self.mirror(&lease.event_id).await;
                WorkerOutcome::Withdrawn
            }
            Ok(false) => WorkerOutcome::LeaseLost,
            Err(err) => {
                error!(error = %err, "closing withdrawn event failed; left for reclaim");
                WorkerOutcome::Failed {
                    dead_lettered: false,
                }
            }
        }
    }

    /// Writes a committed forecast to the gateway and marks it published.
    ///
    /// Returns false if any step failed; the next tick retries.
    async fn publish(&self, forecast: &ForecastRecord) -> bool {
        if let Err(err) = self.gateway.save_forecast(forecast).await {
            warn!(event_id = %forecast.event_id, error = %err, "forecast write failed; will re-publish");
            return false;
        }
        match self.ledger.mark_published(&forecast.event_id).await {
            Ok(marked) => {
                self.mirror(&forecast.event_id).await;
                marked
            }
            Err(err) => {
                warn!(event_id = %forecast.event_id, error = %err, "mark published failed");
                false
            }
        }
    }

    /// Copies the ledger entry to the gateway's audit mirror.
    async fn mirror(&self, event_id: &EventId) {
        let entry = match self.ledger.get(event_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(err) => {
                debug!(event_id = %event_id, error = %err, "ledger read for mirror failed");
                return;
            }
        };
        if let Err(err) = self.gateway.save_ledger_entry(&entry).await {
            debug!(event_id = %event_id, error = %err, "ledger mirror write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_follow_outcomes() {
        let mut summary = TickSummary::default();
        summary.record(WorkerOutcome::NotAcquired);
        summary.record(WorkerOutcome::Committed);
        summary.record(WorkerOutcome::Failed {
            dead_lettered: false,
        });
        summary.record(WorkerOutcome::Failed {
            dead_lettered: true,
        });
        summary.record(WorkerOutcome::Withdrawn);
        summary.record(WorkerOutcome::LeaseLost);
        summary.record(WorkerOutcome::Crashed);

        assert_eq!(summary.attempted, 5);
        assert_eq!(summary.crashed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.committed, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(summary.withdrawn, 1);
    }

    #[test]
    fn config_defaults_track_orchestrator_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.lead_time, Duration::from_secs(3600));
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.stale_lease_threshold, Duration::from_secs(240));
    }

    #[test]
    fn withdrawal_reason_names_status() {
        let now: DateTime<Utc> = "2024-11-02T22:30:00Z".parse().unwrap();
        let mut event = Event::scheduled(
            EventId::new("g1").unwrap(),
            now,
            crate::event::Participant::new(tipoff_core::ParticipantId::new("BOS").unwrap(), "Boston"),
            crate::event::Participant::new(tipoff_core::ParticipantId::new("NYK").unwrap(), "New York"),
        );
        assert!(withdrawal_reason(&event, now).contains("started"));
        event.status = crate::event::EventStatus::Canceled;
        assert_eq!(withdrawal_reason(&event, now), "event is canceled");
    }
}
