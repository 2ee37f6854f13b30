//! In-memory collaborator implementations for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: contents are whatever the caller puts in
//! - **No persistence**: All state is lost when the process exits

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tipoff_core::{EventId, ParticipantId};

use super::{EventSource, NewsStore, StructuredDataStore};
use crate::error::{Error, Result};
use crate::event::{Event, EventStatus};
use crate::facts::{NewsItem, Odds, Refreshed, TeamStats};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// Mutable in-memory schedule.
///
/// ## Example
///
/// ```rust
/// use tipoff_flow::sources::memory::InMemoryEventSource;
///
/// let source = InMemoryEventSource::new();
/// source.set_unavailable(true); // next fetches fail with a transient error
/// ```
#[derive(Debug, Default)]
pub struct InMemoryEventSource {
    events: RwLock<BTreeMap<EventId, Event>>,
    unavailable: AtomicBool,
}

impl InMemoryEventSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an event.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn upsert(&self, event: Event) -> Result<()> {
        let mut events = self.events.write().map_err(poison_err)?;
        events.insert(event.id.clone(), event);
        drop(events);
        Ok(())
    }

    /// Removes an event from the schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn remove(&self, event_id: &EventId) -> Result<()> {
        let mut events = self.events.write().map_err(poison_err)?;
        events.remove(event_id);
        drop(events);
        Ok(())
    }

    /// Updates the status of a listed event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EventNotFound`] if the event is not listed.
    pub fn set_status(&self, event_id: &EventId, status: EventStatus) -> Result<()> {
        let mut events = self.events.write().map_err(poison_err)?;
        let event = events
            .get_mut(event_id)
            .ok_or_else(|| Error::EventNotFound {
                event_id: event_id.clone(),
            })?;
        event.status = status;
        drop(events);
        Ok(())
    }

    /// Moves the start time of a listed event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EventNotFound`] if the event is not listed.
    pub fn set_start_time(&self, event_id: &EventId, start_time: DateTime<Utc>) -> Result<()> {
        let mut events = self.events.write().map_err(poison_err)?;
        let event = events
            .get_mut(event_id)
            .ok_or_else(|| Error::EventNotFound {
                event_id: event_id.clone(),
            })?;
        event.start_time = start_time;
        drop(events);
        Ok(())
    }

    /// Makes every subsequent fetch fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::transient("schedule provider unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    async fn fetch_schedule(&self) -> Result<Vec<Event>> {
        self.check_available()?;
        let events = self.events.read().map_err(poison_err)?;
        Ok(events.values().cloned().collect())
    }

    async fn fetch_event(&self, event_id: &EventId) -> Result<Option<Event>> {
        self.check_available()?;
        let events = self.events.read().map_err(poison_err)?;
        Ok(events.get(event_id).cloned())
    }
}

#[derive(Debug, Default)]
struct DataState {
    stats: HashMap<ParticipantId, Refreshed<TeamStats>>,
    odds: HashMap<EventId, Refreshed<Odds>>,
    news: Vec<NewsItem>,
}

/// In-memory structured and unstructured data store.
///
/// Implements both [`StructuredDataStore`] and [`NewsStore`].
#[derive(Debug, Default)]
pub struct InMemoryDataStore {
    state: RwLock<DataState>,
    news_unavailable: AtomicBool,
}

impl InMemoryDataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a participant's recent stats.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn set_stats(&self, participant: ParticipantId, stats: Refreshed<TeamStats>) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.stats.insert(participant, stats);
        drop(state);
        Ok(())
    }

    /// Sets an event's odds.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn set_odds(&self, event_id: EventId, odds: Refreshed<Odds>) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.odds.insert(event_id, odds);
        drop(state);
        Ok(())
    }

    /// Adds a news item or injury report.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn add_news(&self, item: NewsItem) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.news.push(item);
        drop(state);
        Ok(())
    }

    /// Makes news fetches fail (or succeed again).
    pub fn set_news_unavailable(&self, unavailable: bool) {
        self.news_unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl StructuredDataStore for InMemoryDataStore {
    async fn get_recent_stats(
        &self,
        participant: &ParticipantId,
    ) -> Result<Option<Refreshed<TeamStats>>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.stats.get(participant).cloned())
    }

    async fn get_odds(&self, event_id: &EventId) -> Result<Option<Refreshed<Odds>>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.odds.get(event_id).cloned())
    }
}

#[async_trait]
impl NewsStore for InMemoryDataStore {
    async fn get_news(
        &self,
        participant: &ParticipantId,
        since: DateTime<Utc>,
    ) -> Result<Vec<NewsItem>> {
        if self.news_unavailable.load(Ordering::SeqCst) {
            return Err(Error::transient("news feed unavailable"));
        }
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .news
            .iter()
            .filter(|item| &item.participant == participant && item.published_at >= since)
            .cloned()
            .collect())
    }
}
