//! Prompt rendering from a [`GenerationRequest`].

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::context::GenerationRequest;
use crate::facts::{NewsItem, Odds};

const SYSTEM: &str = "You are an NBA betting expert. You predict which team will cover the \
point spread and answer with a single JSON object and nothing else.";

/// Serialized prompt handed to a text generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// System instruction.
    pub system: String,
    /// User message carrying the event context.
    pub user: String,
}

impl Prompt {
    /// Renders the prompt for `request`.
    #[must_use]
    pub fn render(request: &GenerationRequest) -> Self {
        let event = request.event();
        let home = &event.home.name;
        let away = &event.away.name;
        let mut user = String::new();

        let _ = writeln!(user, "Predict which team will cover the spread for this game:");
        let _ = writeln!(user, "- Event ID: {}", event.id);
        let _ = writeln!(user, "- Matchup: {away} @ {home}");
        let _ = writeln!(
            user,
            "- Start: {}",
            event.start_time.format("%A, %B %d, %Y at %H:%M UTC")
        );
        let _ = writeln!(
            user,
            "- Spread: {}",
            describe_spread(&request.odds().value, home, away)
        );
        if let Some(total) = request.odds().value.total {
            let _ = writeln!(user, "- Total: {total}");
        }

        for (label, side) in [("Home", request.home()), ("Away", request.away())] {
            let _ = writeln!(user);
            let _ = writeln!(
                user,
                "{label} team ({}) averages over the last {} games:",
                side.participant().name,
                side.stats().value.games_sampled
            );
            let stats = &side.stats().value;
            let _ = writeln!(
                user,
                "Points: {:.1}, Rebounds: {:.1}, Assists: {:.1}",
                stats.points, stats.rebounds, stats.assists
            );
        }

        let _ = writeln!(user);
        let _ = writeln!(user, "Injuries:");
        for side in [request.home(), request.away()] {
            let _ = writeln!(
                user,
                "- {}: {}",
                side.participant().name,
                join_items(side.injuries(), "No injuries reported.")
            );
        }

        let _ = writeln!(user);
        let _ = writeln!(user, "News:");
        for side in [request.home(), request.away()] {
            let _ = writeln!(
                user,
                "- {}: {}",
                side.participant().name,
                join_items(side.news(), "No recent news.")
            );
        }

        if request.is_reduced() {
            let _ = writeln!(user);
            let _ = writeln!(user, "Reduced context:");
            for gap in request.gaps() {
                let _ = writeln!(user, "- {gap}");
            }
            let _ = writeln!(
                user,
                "Mention the missing context in your rationale."
            );
        }

        let _ = writeln!(user);
        let _ = writeln!(user, "Return a JSON object with exactly these fields:");
        let _ = writeln!(
            user,
            "- \"pick\": \"home\" if {home} covers, \"away\" if {away} covers"
        );
        let _ = writeln!(
            user,
            "- \"confidence\": number between 0 and 1"
        );
        let _ = writeln!(user, "- \"rationale\": one reasoning paragraph");

        Self {
            system: SYSTEM.to_string(),
            user,
        }
    }
}

/// Describes the line as "X favored by N points".
fn describe_spread(odds: &Odds, home: &str, away: &str) -> String {
    if odds.spread.abs() < f64::EPSILON {
        return "pick'em".to_string();
    }
    let favorite = if odds.spread < 0.0 { home } else { away };
    format!("{favorite} favored by {} points", odds.spread.abs())
}

fn join_items(items: &[NewsItem], empty: &str) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    items
        .iter()
        .map(|item| {
            if item.summary.is_empty() {
                item.headline.clone()
            } else {
                format!("{}: {}", item.headline, item.summary)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use tipoff_core::{EventId, ParticipantId};

    use crate::context::{AssemblerConfig, ContextAssembler};
    use crate::error::Result;
    use crate::event::{Event, Participant};
    use crate::facts::{NewsKind, Refreshed, TeamStats};
    use crate::sources::memory::InMemoryDataStore;

    #[tokio::test]
    async fn renders_matchup_stats_and_contract() -> Result<()> {
        let start = Utc.with_ymd_and_hms(2024, 11, 2, 23, 30, 0).unwrap();
        let store = Arc::new(InMemoryDataStore::new());
        let stats = TeamStats {
            games_sampled: 5,
            points: 112.44,
            rebounds: 44.0,
            assists: 26.0,
        };
        store.set_stats(ParticipantId::new("LAL")?, Refreshed::new(stats.clone(), start))?;
        store.set_stats(ParticipantId::new("BOS")?, Refreshed::new(stats, start))?;
        store.set_odds(
            EventId::new("g1")?,
            Refreshed::new(
                Odds {
                    spread: -3.5,
                    home_moneyline: Some(-160),
                    away_moneyline: Some(140),
                    total: Some(221.5),
                },
                start,
            ),
        )?;
        store.add_news(NewsItem {
            participant: ParticipantId::new("LAL")?,
            kind: NewsKind::Injury,
            headline: "Davis".into(),
            summary: "questionable".into(),
            source: "wire".into(),
            published_at: start - chrono::Duration::hours(3),
        })?;
        let event = Event::scheduled(
            EventId::new("g1")?,
            start,
            Participant::new(ParticipantId::new("LAL")?, "Lakers"),
            Participant::new(ParticipantId::new("BOS")?, "Celtics"),
        );
        let request = ContextAssembler::new(store.clone(), store, AssemblerConfig::default())
            .assemble(&event)
            .await?;

        let prompt = Prompt::render(&request);
        assert!(prompt.user.contains("Celtics @ Lakers"));
        assert!(prompt.user.contains("Lakers favored by 3.5 points"));
        assert!(prompt.user.contains("Points: 112.4"));
        assert!(prompt.user.contains("Davis: questionable"));
        assert!(prompt.user.contains("No recent news."));
        assert!(prompt.user.contains("Reduced context:"));
        assert!(prompt.user.contains("\"rationale\""));
        Ok(())
    }

    #[test]
    fn spread_favorite_follows_sign() {
        let mut odds = Odds {
            spread: -3.5,
            home_moneyline: None,
            away_moneyline: None,
            total: None,
        };
        assert_eq!(
            describe_spread(&odds, "Lakers", "Celtics"),
            "Lakers favored by 3.5 points"
        );
        odds.spread = 6.0;
        assert_eq!(
            describe_spread(&odds, "Lakers", "Celtics"),
            "Celtics favored by 6 points"
        );
        odds.spread = 0.0;
        assert_eq!(describe_spread(&odds, "Lakers", "Celtics"), "pick'em");
    }
}
