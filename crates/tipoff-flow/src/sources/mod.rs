//! Collaborator interfaces for schedule, structured and unstructured data.
//!
//! The orchestrator never talks to third-party APIs directly. It consumes
//! these traits; ingestion pipelines (or the fixture-backed source used by
//! the service binary) implement them.
//!
//! ## Implementations
//!
//! - [`memory`]: mutable in-memory sources for tests and embedding
//! - [`fixture`]: JSON fixture file, re-read on every call

pub mod fixture;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tipoff_core::{EventId, ParticipantId};

use crate::error::Result;
use crate::event::Event;
use crate::facts::{NewsItem, Odds, Refreshed, TeamStats};

/// Source of the event schedule.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetches the full upcoming schedule.
    async fn fetch_schedule(&self) -> Result<Vec<Event>>;

    /// Fetches the current view of a single event.
    ///
    /// Returns `None` if the provider no longer lists the event.
    async fn fetch_event(&self, event_id: &EventId) -> Result<Option<Event>>;
}

/// Structured-data store: statistics and odds, each with a refresh timestamp.
#[async_trait]
pub trait StructuredDataStore: Send + Sync {
    /// Gets recent per-game averages for a participant.
    async fn get_recent_stats(
        &self,
        participant: &ParticipantId,
    ) -> Result<Option<Refreshed<TeamStats>>>;

    /// Gets the current line for an event.
    async fn get_odds(&self, event_id: &EventId) -> Result<Option<Refreshed<Odds>>>;
}

/// Unstructured-data store: news articles and injury reports.
#[async_trait]
pub trait NewsStore: Send + Sync {
    /// Gets items about a participant published at or after `since`.
    ///
    /// May return an empty list.
    async fn get_news(
        &self,
        participant: &ParticipantId,
        since: DateTime<Utc>,
    ) -> Result<Vec<NewsItem>>;
}
