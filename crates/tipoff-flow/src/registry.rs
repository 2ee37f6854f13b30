//! Event registry: the last known-good view of upcoming events.
//!
//! The registry is refreshed periodically from an [`EventSource`]. A failed
//! refresh is non-fatal: the previous snapshot keeps being served.
//!
//! ## Merge rules
//!
//! - Unknown events are inserted as fetched.
//! - Start time and participants of a known event change only while the
//!   known event is still `scheduled`.
//! - Status changes follow [`EventStatus::can_transition_to`]; anything
//!   else is ignored with a warning.
//! - Events missing from a fetch are retained.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tipoff_core::EventId;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::metrics::FlowMetrics;
use crate::sources::EventSource;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// Outcome of a registry refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The fetched schedule was merged into the snapshot.
    Refreshed {
        /// Events in the snapshot after the merge.
        events: usize,
        /// Events inserted or changed by the merge.
        changed: usize,
    },
    /// The fetch failed; the previous snapshot is still served.
    KeptPrevious {
        /// Why the fetch failed.
        reason: String,
    },
}

impl RefreshOutcome {
    /// Returns true if the snapshot was refreshed.
    #[must_use]
    pub const fn is_refreshed(&self) -> bool {
        matches!(self, Self::Refreshed { .. })
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    events: HashMap<EventId, Event>,
    refreshed_at: Option<DateTime<Utc>>,
}

/// In-memory view of upcoming events.
pub struct EventRegistry {
    source: Arc<dyn EventSource>,
    fetch_timeout: Duration,
    snapshot: RwLock<Snapshot>,
    metrics: FlowMetrics,
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl EventRegistry {
    /// Creates an empty registry backed by `source`.
    #[must_use]
    pub fn new(source: Arc<dyn EventSource>, fetch_timeout: Duration) -> Self {
        Self {
            source,
            fetch_timeout,
            snapshot: RwLock::new(Snapshot::default()),
            metrics: FlowMetrics::new(),
        }
    }

    /// Fetches the schedule and merges it into the snapshot.
    ///
    /// Fetch errors and timeouts keep the previous snapshot and are reported
    /// as [`RefreshOutcome::KeptPrevious`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the snapshot lock is poisoned.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<RefreshOutcome> {
        let fetched = match tokio::time::timeout(self.fetch_timeout, self.source.fetch_schedule())
            .await
        {
            Ok(Ok(events)) => events,
            Ok(Err(err)) => return Ok(self.kept_previous(err.to_string())),
            Err(_) => {
                return Ok(self.kept_previous(format!(
                    "schedule fetch timed out after {:?}",
                    self.fetch_timeout
                )));
            }
        };

        let mut snapshot = self.snapshot.write().map_err(poison_err)?;
        let mut changed = 0;
        for incoming in fetched {
            if merge_into(&mut snapshot.events, incoming) {
                changed += 1;
            }
        }
        snapshot.refreshed_at = Some(now);
        let events = snapshot.events.len();
        drop(snapshot);

        self.metrics.record_registry_refresh("refreshed");
        info!(events, changed, "registry refreshed");
        Ok(RefreshOutcome::Refreshed { events, changed })
    }

    fn kept_previous(&self, reason: String) -> RefreshOutcome {
        self.metrics.record_registry_refresh("kept_previous");
        warn!(reason = %reason, "registry refresh failed; serving previous snapshot");
        RefreshOutcome::KeptPrevious { reason }
    }

    /// Returns `scheduled` events with `start_time - lead_time <= as_of`,
    /// earliest start first (ties broken by event ID).
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot lock is poisoned.
    pub fn list_due_events(&self, as_of: DateTime<Utc>, lead_time: Duration) -> Result<Vec<Event>> {
        let snapshot = self.snapshot.read().map_err(poison_err)?;
        let mut due: Vec<Event> = snapshot
            .events
            .values()
            .filter(|e| e.is_scheduled() && e.is_due(as_of, lead_time))
            .cloned()
            .collect();
        drop(snapshot);
        due.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(due)
    }

    /// Returns the snapshot's view of an event.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot lock is poisoned.
    pub fn get(&self, event_id: &EventId) -> Result<Option<Event>> {
        let snapshot = self.snapshot.read().map_err(poison_err)?;
        Ok(snapshot.events.get(event_id).cloned())
    }

    /// Returns when the snapshot was last refreshed successfully.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot lock is poisoned.
    pub fn refreshed_at(&self) -> Result<Option<DateTime<Utc>>> {
        let snapshot = self.snapshot.read().map_err(poison_err)?;
        Ok(snapshot.refreshed_at)
    }

    /// Re-checks one event against the source and merges the answer.
    ///
    /// Falls back to the snapshot if the targeted fetch fails, times out, or
    /// the provider no longer lists the event.
    ///
    /// # Errors
    ///
    /// Returns an error only if the snapshot lock is poisoned.
    pub async fn revalidate(&self, event_id: &EventId) -> Result<Option<Event>> {
        match tokio::time::timeout(self.fetch_timeout, self.source.fetch_event(event_id)).await {
            Ok(Ok(Some(incoming))) => {
                let mut snapshot = self.snapshot.write().map_err(poison_err)?;
                merge_into(&mut snapshot.events, incoming);
                let merged = snapshot.events.get(event_id).cloned();
                drop(snapshot);
                return Ok(merged);
            }
            Ok(Ok(None)) => {
                debug!(event_id = %event_id, "event not listed by source; using snapshot");
            }
            Ok(Err(err)) => {
                warn!(event_id = %event_id, error = %err, "revalidation failed; using snapshot");
            }
            Err(_) => {
                warn!(event_id = %event_id, "revalidation timed out; using snapshot");
            }
        }
        self.get(event_id)
    }

    /// Refreshes every `interval` until `cancel` fires.
    pub async fn run_refresh_loop(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("registry refresh loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.refresh(Utc::now()).await {
                        warn!(error = %err, "registry refresh errored");
                    }
                }
            }
        }
    }
}

/// Merges `incoming` into `events`. Returns true if anything changed.
fn merge_into(events: &mut HashMap<EventId, Event>, incoming: Event) -> bool {
    let Some(known) = events.get_mut(&incoming.id) else {
        events.insert(incoming.id.clone(), incoming);
        return true;
    };
    if *known == incoming {
        return false;
    }

    let mut changed = false;
    if known.is_scheduled() {
        if known.start_time != incoming.start_time {
            debug!(
                event_id = %known.id,
                from = %known.start_time,
                to = %incoming.start_time,
                "start time moved"
            );
            known.start_time = incoming.start_time;
            changed = true;
        }
        if known.home != incoming.home || known.away != incoming.away {
            known.home = incoming.home;
            known.away = incoming.away;
            changed = true;
        }
    }

    if known.status != incoming.status {
        if known.status.can_transition_to(incoming.status) {
            known.status = incoming.status;
            changed = true;
        } else {
            warn!(
                event_id = %known.id,
                from = %known.status,
                to = %incoming.status,
                "ignoring invalid status transition from source"
            );
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventStatus, Participant};
    use crate::sources::memory::InMemoryEventSource;
    use chrono::TimeZone;
    use tipoff_core::ParticipantId;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 2, 12, 0, 0).unwrap()
    }

    fn event(id: &str, start: DateTime<Utc>) -> Event {
        Event::scheduled(
            EventId::new(id).unwrap(),
            start,
            Participant::new(ParticipantId::new("LAL").unwrap(), "Lakers"),
            Participant::new(ParticipantId::new("BOS").unwrap(), "Celtics"),
        )
    }

    fn registry(source: &Arc<InMemoryEventSource>) -> EventRegistry {
        EventRegistry::new(source.clone(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn due_events_are_earliest_first() -> Result<()> {
        let source = Arc::new(InMemoryEventSource::new());
        source.upsert(event("late", base() + chrono::Duration::minutes(50)))?;
        source.upsert(event("early", base() + chrono::Duration::minutes(10)))?;
        source.upsert(event("far", base() + chrono::Duration::hours(5)))?;
        let registry = registry(&source);
        assert!(registry.refresh(base()).await?.is_refreshed());

        let due = registry.list_due_events(base(), Duration::from_secs(3600))?;
        let ids: Vec<&str> = due.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() -> Result<()> {
        let source = Arc::new(InMemoryEventSource::new());
        source.upsert(event("g1", base()))?;
        let registry = registry(&source);
        registry.refresh(base()).await?;

        source.set_unavailable(true);
        let outcome = registry.refresh(base()).await?;
        assert!(matches!(outcome, RefreshOutcome::KeptPrevious { .. }));
        assert!(registry.get(&EventId::new("g1")?)?.is_some());
        assert_eq!(registry.refreshed_at()?, Some(base()));
        Ok(())
    }

    #[tokio::test]
    async fn start_time_frozen_once_started() -> Result<()> {
        let source = Arc::new(InMemoryEventSource::new());
        let id = EventId::new("g1")?;
        source.upsert(event("g1", base()))?;
        let registry = registry(&source);
        registry.refresh(base()).await?;

        source.set_start_time(&id, base() + chrono::Duration::hours(1))?;
        registry.refresh(base()).await?;
        assert_eq!(
            registry.get(&id)?.map(|e| e.start_time),
            Some(base() + chrono::Duration::hours(1))
        );

        source.set_status(&id, EventStatus::Started)?;
        registry.refresh(base()).await?;
        source.set_start_time(&id, base() + chrono::Duration::hours(3))?;
        registry.refresh(base()).await?;

        let known = registry.get(&id)?.unwrap();
        assert_eq!(known.status, EventStatus::Started);
        assert_eq!(known.start_time, base() + chrono::Duration::hours(1));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_status_regression_is_ignored() -> Result<()> {
        let source = Arc::new(InMemoryEventSource::new());
        let id = EventId::new("g1")?;
        source.upsert(event("g1", base()))?;
        source.set_status(&id, EventStatus::Canceled)?;
        let registry = registry(&source);
        registry.refresh(base()).await?;

        source.set_status(&id, EventStatus::Scheduled)?;
        registry.refresh(base()).await?;
        assert_eq!(
            registry.get(&id)?.map(|e| e.status),
            Some(EventStatus::Canceled)
        );
        Ok(())
    }

    #[tokio::test]
    async fn events_missing_from_fetch_are_retained() -> Result<()> {
        let source = Arc::new(InMemoryEventSource::new());
        let id = EventId::new("g1")?;
        source.upsert(event("g1", base()))?;
        let registry = registry(&source);
        registry.refresh(base()).await?;

        source.remove(&id)?;
        registry.refresh(base()).await?;
        assert!(registry.get(&id)?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn revalidate_sees_cancellation_before_refresh() -> Result<()> {
        let source = Arc::new(InMemoryEventSource::new());
        let id = EventId::new("g1")?;
        source.upsert(event("g1", base()))?;
        let registry = registry(&source);
        registry.refresh(base()).await?;

        source.set_status(&id, EventStatus::Canceled)?;
        let fresh = registry.revalidate(&id).await?.unwrap();
        assert_eq!(fresh.status, EventStatus::Canceled);

        source.set_unavailable(true);
        let fallback = registry.revalidate(&id).await?.unwrap();
        assert_eq!(fallback.status, EventStatus::Canceled);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_loop_stops_on_cancel() {
        let source = Arc::new(InMemoryEventSource::new());
        let registry = Arc::new(registry(&source));
        let cancel = CancellationToken::new();
        let handle = {
            let registry = registry.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                registry
                    .run_refresh_loop(Duration::from_millis(5), cancel)
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(registry.refreshed_at().unwrap().is_some());
    }
}
