//! Structured and unstructured facts consumed by the context assembler.
//!
//! Structured facts ([`TeamStats`], [`Odds`]) arrive wrapped in
//! [`Refreshed`] so staleness can be judged against the event start time.
//! Unstructured facts ([`NewsItem`]) are best-effort.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tipoff_core::{EventId, ParticipantId};

/// Number of recent games averaged into [`TeamStats`] by default.
pub const DEFAULT_RECENT_GAMES: usize = 5;

/// A value annotated with the time its source last refreshed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refreshed<T> {
    /// The payload.
    pub value: T,
    /// When the collaborator last refreshed the payload.
    pub refreshed_at: DateTime<Utc>,
}

impl<T> Refreshed<T> {
    /// Wraps a value with its refresh timestamp.
    #[must_use]
    pub const fn new(value: T, refreshed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            refreshed_at,
        }
    }
}

/// A single completed game line for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxScore {
    /// The participant the line belongs to.
    pub participant: ParticipantId,
    /// When the game was played.
    pub played_at: DateTime<Utc>,
    /// Points scored.
    pub points: u32,
    /// Total rebounds.
    pub rebounds: u32,
    /// Total assists.
    pub assists: u32,
}

/// Recent per-game averages for a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStats {
    /// Number of games the averages cover.
    pub games_sampled: u32,
    /// Average points per game.
    pub points: f64,
    /// Average rebounds per game.
    pub rebounds: f64,
    /// Average assists per game.
    pub assists: f64,
}

impl TeamStats {
    /// Averages the participant's `limit` most recent games.
    ///
    /// Returns `None` when the participant has no games.
    #[must_use]
    pub fn from_recent_games(
        games: &[BoxScore],
        participant: &ParticipantId,
        limit: usize,
    ) -> Option<Self> {
        let mut mine: Vec<&BoxScore> = games
            .iter()
            .filter(|g| &g.participant == participant)
            .collect();
        mine.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        mine.truncate(limit);
        if mine.is_empty() {
            return None;
        }

        let n = f64::from(u32::try_from(mine.len()).unwrap_or(u32::MAX));
        let sum = |f: fn(&BoxScore) -> u32| mine.iter().map(|g| f64::from(f(g))).sum::<f64>();
        Some(Self {
            games_sampled: u32::try_from(mine.len()).unwrap_or(u32::MAX),
            points: sum(|g| g.points) / n,
            rebounds: sum(|g| g.rebounds) / n,
            assists: sum(|g| g.assists) / n,
        })
    }
}

/// Current betting line for an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Odds {
    /// Point spread from the home participant's perspective.
    /// Negative means the home side is favored.
    pub spread: f64,
    /// Home moneyline, if quoted.
    #[serde(default)]
    pub home_moneyline: Option<i32>,
    /// Away moneyline, if quoted.
    #[serde(default)]
    pub away_moneyline: Option<i32>,
    /// Over/under total, if quoted.
    #[serde(default)]
    pub total: Option<f64>,
}

/// Kind of unstructured item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewsKind {
    /// General news coverage.
    Article,
    /// Injury or availability report.
    Injury,
}

/// A news article or injury report about a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    /// The participant the item concerns.
    pub participant: ParticipantId,
    /// Article or injury report.
    pub kind: NewsKind,
    /// Headline (for injuries: the player and status).
    pub headline: String,
    /// Short summary.
    #[serde(default)]
    pub summary: String,
    /// Publisher or feed name.
    #[serde(default)]
    pub source: String,
    /// Publication time.
    pub published_at: DateTime<Utc>,
}

/// Odds keyed to an event, as delivered by fixture feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOdds {
    /// The event the line belongs to.
    pub event_id: EventId,
    /// The line.
    pub odds: Odds,
    /// When the line was last refreshed.
    pub refreshed_at: DateTime<Utc>,
}
