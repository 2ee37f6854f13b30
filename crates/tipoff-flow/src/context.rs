//! Context assembly: one immutable [`GenerationRequest`] per attempt.
//!
//! Required structured data (both participants' recent stats and the event
//! odds) must be present and fresh relative to the event start. News is
//! best-effort; whatever is missing is recorded as a [`ContextGap`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tipoff_core::ParticipantId;

use crate::error::{Error, Result};
use crate::event::{Event, Participant};
use crate::facts::{NewsItem, NewsKind, Odds, Refreshed, TeamStats};
use crate::sources::{NewsStore, StructuredDataStore};

/// Assembly tuning.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Maximum age of structured data relative to the event start.
    pub freshness_bound: Duration,
    /// Timeout applied to every collaborator call.
    pub fetch_timeout: Duration,
    /// News window, counted back from the event start.
    pub news_lookback: Duration,
    /// News articles kept per participant (injury reports are always kept).
    pub max_news_items: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            freshness_bound: Duration::from_secs(24 * 3600),
            fetch_timeout: Duration::from_secs(10),
            news_lookback: Duration::from_secs(7 * 24 * 3600),
            max_news_items: 3,
        }
    }
}

/// Unstructured context that is missing from a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "gap", rename_all = "snake_case")]
pub enum ContextGap {
    /// The feed returned nothing for the participant.
    NoNews {
        /// Participant without news.
        participant: ParticipantId,
    },
    /// The feed failed or timed out.
    NewsUnavailable {
        /// Participant whose news could not be fetched.
        participant: ParticipantId,
        /// Failure description.
        reason: String,
    },
}

impl fmt::Display for ContextGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoNews { participant } => write!(f, "no recent news for {participant}"),
            Self::NewsUnavailable { participant, .. } => {
                write!(f, "news for {participant} could not be retrieved")
            }
        }
    }
}

/// Facts gathered for one side of the event.
#[derive(Debug, Clone, PartialEq)]
pub struct SideContext {
    participant: Participant,
    stats: Refreshed<TeamStats>,
    injuries: Vec<NewsItem>,
    news: Vec<NewsItem>,
}

impl SideContext {
    /// The participant.
    #[must_use]
    pub const fn participant(&self) -> &Participant {
        &self.participant
    }

    /// Recent stats with their refresh time.
    #[must_use]
    pub const fn stats(&self) -> &Refreshed<TeamStats> {
        &self.stats
    }

    /// Injury reports inside the news window, newest first.
    #[must_use]
    pub fn injuries(&self) -> &[NewsItem] {
        &self.injuries
    }

    /// News articles inside the news window, newest first.
    #[must_use]
    pub fn news(&self) -> &[NewsItem] {
        &self.news
    }
}

/// Immutable snapshot of everything one generation attempt needs.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    event: Event,
    home: SideContext,
    away: SideContext,
    odds: Refreshed<Odds>,
    gaps: Vec<ContextGap>,
    snapshot_version: u64,
    assembled_at: DateTime<Utc>,
}

impl GenerationRequest {
    /// The event, as seen at assembly time.
    #[must_use]
    pub const fn event(&self) -> &Event {
        &self.event
    }

    /// Home-side facts.
    #[must_use]
    pub const fn home(&self) -> &SideContext {
        &self.home
    }

    /// Away-side facts.
    #[must_use]
    pub const fn away(&self) -> &SideContext {
        &self.away
    }

    /// Current line.
    #[must_use]
    pub const fn odds(&self) -> &Refreshed<Odds> {
        &self.odds
    }

    /// Missing unstructured context.
    #[must_use]
    pub fn gaps(&self) -> &[ContextGap] {
        &self.gaps
    }

    /// Returns true if any unstructured context is missing.
    #[must_use]
    pub fn is_reduced(&self) -> bool {
        !self.gaps.is_empty()
    }

    /// Monotonically increasing snapshot version.
    #[must_use]
    pub const fn snapshot_version(&self) -> u64 {
        self.snapshot_version
    }

    /// When the snapshot was taken.
    #[must_use]
    pub const fn assembled_at(&self) -> DateTime<Utc> {
        self.assembled_at
    }
}

/// Builds [`GenerationRequest`]s from the data collaborators.
pub struct ContextAssembler {
    structured: Arc<dyn StructuredDataStore>,
    news: Arc<dyn NewsStore>,
    config: AssemblerConfig,
    next_version: AtomicU64,
}

impl fmt::Debug for ContextAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextAssembler")
            .field("config", &self.config)
            .field("next_version", &self.next_version)
            .finish_non_exhaustive()
    }
}

impl ContextAssembler {
    /// Creates an assembler. Snapshot versions are seeded from the clock.
    #[must_use]
    pub fn new(
        structured: Arc<dyn StructuredDataStore>,
        news: Arc<dyn NewsStore>,
        config: AssemblerConfig,
    ) -> Self {
        let seed = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);
        Self {
            structured,
            news,
            config,
            next_version: AtomicU64::new(seed),
        }
    }

    /// Returns the assembler configuration.
    #[must_use]
    pub const fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Assembles the generation input for `event`.
    ///
    /// # Errors
    ///
    /// - [`Error::IncompleteData`] if stats for either side or the odds are missing
    /// - [`Error::StaleData`] if the oldest required item was refreshed more than
    ///   `freshness_bound` before the event start
    /// - [`Error::Transient`] if a required fetch fails or times out
    #[tracing::instrument(skip(self, event), fields(event_id = %event.id))]
    pub async fn assemble(&self, event: &Event) -> Result<GenerationRequest> {
        let (home_stats, away_stats, odds) = tokio::join!(
            self.fetch("home_stats", self.structured.get_recent_stats(&event.home.id)),
            self.fetch("away_stats", self.structured.get_recent_stats(&event.away.id)),
            self.fetch("odds", self.structured.get_odds(&event.id)),
        );
        let (home_stats, away_stats, odds) = (home_stats?, away_stats?, odds?);

        let missing: Vec<String> = [
            ("home_stats", home_stats.is_none()),
            ("away_stats", away_stats.is_none()),
            ("odds", odds.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then(|| name.to_string()))
        .collect();
        let (Some(home_stats), Some(away_stats), Some(odds)) = (home_stats, away_stats, odds)
        else {
            return Err(Error::IncompleteData {
                event_id: event.id.clone(),
                missing,
            });
        };

        let oldest = home_stats
            .refreshed_at
            .min(away_stats.refreshed_at)
            .min(odds.refreshed_at);
        if event.start_time - oldest > crate::signed(self.config.freshness_bound) {
            return Err(Error::StaleData {
                event_id: event.id.clone(),
                refreshed_at: oldest,
                start_time: event.start_time,
                bound_secs: self.config.freshness_bound.as_secs(),
            });
        }

        let since = event
            .start_time
            .checked_sub_signed(crate::signed(self.config.news_lookback))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut gaps = Vec::new();
        let (home_items, away_items) = tokio::join!(
            self.fetch_news(&event.home.id, since),
            self.fetch_news(&event.away.id, since),
        );
        let home = self.side(event.home.clone(), home_stats, home_items, &mut gaps);
        let away = self.side(event.away.clone(), away_stats, away_items, &mut gaps);

        let snapshot_version = self.next_version.fetch_add(1, Ordering::SeqCst);
        debug!(snapshot_version, gaps = gaps.len(), "context assembled");
        Ok(GenerationRequest {
            event: event.clone(),
            home,
            away,
            odds,
            gaps,
            snapshot_version,
            assembled_at: Utc::now(),
        })
    }

    async fn fetch<T>(
        &self,
        what: &str,
        call: impl Future<Output = Result<Option<T>>>,
    ) -> Result<Option<T>> {
        match tokio::time::timeout(self.config.fetch_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::transient(format!("{what} fetch failed: {err}"))),
            Err(_) => Err(Error::transient(format!(
                "{what} fetch timed out after {:?}",
                self.config.fetch_timeout
            ))),
        }
    }

    async fn fetch_news(
        &self,
        participant: &ParticipantId,
        since: DateTime<Utc>,
    ) -> std::result::Result<Vec<NewsItem>, String> {
        match tokio::time::timeout(
            self.config.fetch_timeout,
            self.news.get_news(participant, since),
        )
        .await
        {
            Ok(Ok(items)) => Ok(items),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "news fetch timed out after {:?}",
                self.config.fetch_timeout
            )),
        }
    }

    fn side(
        &self,
        participant: Participant,
        stats: Refreshed<TeamStats>,
        items: std::result::Result<Vec<NewsItem>, String>,
        gaps: &mut Vec<ContextGap>,
    ) -> SideContext {
        let mut items = match items {
            Ok(items) => items,
            Err(reason) => {
                warn!(participant = %participant.id, reason = %reason, "news unavailable");
                gaps.push(ContextGap::NewsUnavailable {
                    participant: participant.id.clone(),
                    reason,
                });
                Vec::new()
            }
        };
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        let (injuries, mut news): (Vec<NewsItem>, Vec<NewsItem>) = items
            .into_iter()
            .partition(|item| item.kind == NewsKind::Injury);
        news.truncate(self.config.max_news_items);

        let already_flagged = gaps.iter().any(|g| {
            matches!(g, ContextGap::NewsUnavailable { participant: p, .. } if *p == participant.id)
        });
        if injuries.is_empty() && news.is_empty() && !already_flagged {
            gaps.push(ContextGap::NoNews {
                participant: participant.id.clone(),
            });
        }

        SideContext {
            participant,
            stats,
            injuries,
            news,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::memory::InMemoryDataStore;
    use chrono::TimeZone;
    use tipoff_core::EventId;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 2, 23, 30, 0).unwrap()
    }

    fn event() -> Event {
        Event::scheduled(
            EventId::new("g1").unwrap(),
            start(),
            Participant::new(ParticipantId::new("LAL").unwrap(), "Lakers"),
            Participant::new(ParticipantId::new("BOS").unwrap(), "Celtics"),
        )
    }

    fn stats() -> TeamStats {
        TeamStats {
            games_sampled: 5,
            points: 112.4,
            rebounds: 44.0,
            assists: 26.2,
        }
    }

    fn seeded(refreshed_hours_before_start: i64) -> Result<Arc<InMemoryDataStore>> {
        let store = Arc::new(InMemoryDataStore::new());
        let at = start() - chrono::Duration::hours(refreshed_hours_before_start);
        store.set_stats(ParticipantId::new("LAL")?, Refreshed::new(stats(), at))?;
        store.set_stats(ParticipantId::new("BOS")?, Refreshed::new(stats(), at))?;
        store.set_odds(
            EventId::new("g1")?,
            Refreshed::new(
                Odds {
                    spread: -3.5,
                    home_moneyline: None,
                    away_moneyline: None,
                    total: None,
                },
                at,
            ),
        )?;
        Ok(store)
    }

    fn assembler(store: &Arc<InMemoryDataStore>) -> ContextAssembler {
        ContextAssembler::new(store.clone(), store.clone(), AssemblerConfig::default())
    }

    fn news(team: &str, kind: NewsKind, hours_before: i64) -> NewsItem {
        NewsItem {
            participant: ParticipantId::new(team).unwrap(),
            kind,
            headline: format!("{team} {hours_before}"),
            summary: String::new(),
            source: "wire".into(),
            published_at: start() - chrono::Duration::hours(hours_before),
        }
    }

    #[tokio::test]
    async fn missing_items_are_listed() -> Result<()> {
        let store = Arc::new(InMemoryDataStore::new());
        store.set_stats(ParticipantId::new("LAL")?, Refreshed::new(stats(), start()))?;
        let err = assembler(&store).assemble(&event()).await.unwrap_err();
        match err {
            Error::IncompleteData { missing, .. } => {
                assert_eq!(missing, vec!["away_stats".to_string(), "odds".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn data_older_than_bound_is_stale() -> Result<()> {
        let store = seeded(26)?;
        let err = assembler(&store).assemble(&event()).await.unwrap_err();
        assert!(matches!(err, Error::StaleData { bound_secs: 86_400, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn data_at_bound_is_fresh() -> Result<()> {
        let store = seeded(24)?;
        assert!(assembler(&store).assemble(&event()).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn absent_news_is_recorded_as_gap() -> Result<()> {
        let store = seeded(2)?;
        let request = assembler(&store).assemble(&event()).await?;
        assert!(request.is_reduced());
        assert_eq!(request.gaps().len(), 2);
        assert!(matches!(request.gaps()[0], ContextGap::NoNews { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn news_failure_does_not_fail_assembly() -> Result<()> {
        let store = seeded(2)?;
        store.set_news_unavailable(true);
        let request = assembler(&store).assemble(&event()).await?;
        assert_eq!(request.gaps().len(), 2);
        assert!(request
            .gaps()
            .iter()
            .all(|g| matches!(g, ContextGap::NewsUnavailable { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn news_window_and_limits_apply() -> Result<()> {
        let store = seeded(2)?;
        for hours in [1, 2, 3, 4, 5] {
            store.add_news(news("LAL", NewsKind::Article, hours))?;
        }
        store.add_news(news("LAL", NewsKind::Injury, 6))?;
        store.add_news(news("LAL", NewsKind::Article, 24 * 8))?;
        store.add_news(news("BOS", NewsKind::Article, 1))?;

        let request = assembler(&store).assemble(&event()).await?;
        let home = request.home();
        assert_eq!(home.news().len(), 3);
        assert_eq!(home.news()[0].headline, "LAL 1");
        assert_eq!(home.injuries().len(), 1);
        assert!(!request.is_reduced());
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_versions_increase() -> Result<()> {
        let store = seeded(2)?;
        let assembler = assembler(&store);
        let first = assembler.assemble(&event()).await?;
        let second = assembler.assemble(&event()).await?;
        assert!(second.snapshot_version() > first.snapshot_version());
        Ok(())
    }

    #[tokio::test]
    async fn request_is_unaffected_by_later_refresh() -> Result<()> {
        let store = seeded(2)?;
        let request = assembler(&store).assemble(&event()).await?;
        store.set_stats(
            ParticipantId::new("LAL")?,
            Refreshed::new(
                TeamStats {
                    points: 80.0,
                    ..stats()
                },
                start(),
            ),
        )?;
        assert!((request.home().stats().value.points - 112.4).abs() < f64::EPSILON);
        Ok(())
    }
}
