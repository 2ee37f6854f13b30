//! JSON fixture-backed collaborators.
//!
//! The whole fixture document is read from disk on every call, so an external
//! ingestion job can rewrite the file and the next registry refresh (or
//! assembly) sees the new contents.
//!
//! ```json
//! {
//!   "refreshed_at": "2024-11-02T12:00:00Z",
//!   "events": [ { "id": "g1", "start_time": "...", "home": {...}, "away": {...}, "status": "scheduled" } ],
//!   "box_scores": [ { "participant": "LAL", "played_at": "...", "points": 112, "rebounds": 44, "assists": 27 } ],
//!   "odds": [ { "event_id": "g1", "odds": { "spread": -3.5 }, "refreshed_at": "..." } ],
//!   "news": [ { "participant": "LAL", "kind": "injury", "headline": "...", "published_at": "..." } ]
//! }
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use tipoff_core::{EventId, ParticipantId};

use super::{EventSource, NewsStore, StructuredDataStore};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::facts::{
    BoxScore, DEFAULT_RECENT_GAMES, EventOdds, NewsItem, Odds, Refreshed, TeamStats,
};

#[derive(Debug, Deserialize)]
struct FixtureDocument {
    /// Refresh time applied to box-score derived stats.
    refreshed_at: DateTime<Utc>,
    #[serde(default)]
    events: Vec<Event>,
    #[serde(default)]
    box_scores: Vec<BoxScore>,
    #[serde(default)]
    odds: Vec<EventOdds>,
    #[serde(default)]
    news: Vec<NewsItem>,
}

/// Collaborator backed by a JSON fixture file.
///
/// Implements [`EventSource`], [`StructuredDataStore`] and [`NewsStore`].
#[derive(Debug, Clone)]
pub struct JsonFixtureSource {
    path: PathBuf,
    recent_games: usize,
}

impl JsonFixtureSource {
    /// Creates a source reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recent_games: DEFAULT_RECENT_GAMES,
        }
    }

    /// Overrides how many recent games are averaged into stats.
    #[must_use]
    pub fn with_recent_games(mut self, recent_games: usize) -> Self {
        self.recent_games = recent_games;
        self
    }

    async fn load(&self) -> Result<FixtureDocument> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            Error::transient(format!("failed to read {}: {e}", self.path.display()))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Serialization {
            message: format!("invalid fixture {}: {e}", self.path.display()),
        })
    }
}

#[async_trait]
impl EventSource for JsonFixtureSource {
    async fn fetch_schedule(&self) -> Result<Vec<Event>> {
        Ok(self.load().await?.events)
    }

    async fn fetch_event(&self, event_id: &EventId) -> Result<Option<Event>> {
        Ok(self
            .load()
            .await?
            .events
            .into_iter()
            .find(|e| &e.id == event_id))
    }
}

#[async_trait]
impl StructuredDataStore for JsonFixtureSource {
    async fn get_recent_stats(
        &self,
        participant: &ParticipantId,
    ) -> Result<Option<Refreshed<TeamStats>>> {
        let doc = self.load().await?;
        Ok(
            TeamStats::from_recent_games(&doc.box_scores, participant, self.recent_games)
                .map(|stats| Refreshed::new(stats, doc.refreshed_at)),
        )
    }

    async fn get_odds(&self, event_id: &EventId) -> Result<Option<Refreshed<Odds>>> {
        Ok(self
            .load()
            .await?
            .odds
            .into_iter()
            .filter(|o| &o.event_id == event_id)
            .max_by_key(|o| o.refreshed_at)
            .map(|o| Refreshed::new(o.odds, o.refreshed_at)))
    }
}

#[async_trait]
impl NewsStore for JsonFixtureSource {
    async fn get_news(
        &self,
        participant: &ParticipantId,
        since: DateTime<Utc>,
    ) -> Result<Vec<NewsItem>> {
        Ok(self
            .load()
            .await?
            .news
            .into_iter()
            .filter(|n| &n.participant == participant && n.published_at >= since)
            .collect())
    }
}
