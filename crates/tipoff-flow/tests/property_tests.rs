//! Property-based tests for tipoff-flow invariants.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use tokio_test::block_on;

use tipoff_core::{EventId, OwnerToken, ParticipantId};
use tipoff_flow::context::{AssemblerConfig, ContextAssembler};
use tipoff_flow::error::FailureKind;
use tipoff_flow::event::{Event, Participant};
use tipoff_flow::facts::{Odds, Refreshed, TeamStats};
use tipoff_flow::forecast::{ForecastRecord, ForecastStatus, OutcomeLabel};
use tipoff_flow::generation::GenerationClient;
use tipoff_flow::generation::scripted::ScriptedGenerator;
use tipoff_flow::ledger::memory::InMemoryLedger;
use tipoff_flow::ledger::{AcquireResult, FailureRecord, Lease, LedgerEntry, LedgerState};
use tipoff_flow::registry::EventRegistry;
use tipoff_flow::scheduler::retry::RetryPolicy;
use tipoff_flow::scheduler::{SchedulerConfig, TriggerScheduler};
use tipoff_flow::sources::memory::{InMemoryDataStore, InMemoryEventSource};
use tipoff_flow::store::memory::InMemoryGateway;

fn start() -> DateTime<Utc> {
    "2024-11-02T23:30:00Z".parse().unwrap()
}

fn game() -> Event {
    Event::scheduled(
        EventId::new("g1").unwrap(),
        start(),
        Participant::new(ParticipantId::new("DEN").unwrap(), "Denver"),
        Participant::new(ParticipantId::new("PHX").unwrap(), "Phoenix"),
    )
}

fn pending(attempt: u32) -> ForecastRecord {
    ForecastRecord {
        event_id: EventId::new("g1").unwrap(),
        outcome: OutcomeLabel::Away,
        confidence: 0.55,
        raw_confidence: 0.55,
        rationale: "Pace mismatch.".into(),
        model_id: "scripted".into(),
        snapshot_version: u64::from(attempt),
        attempt,
        context_gaps: Vec::new(),
        created_at: start(),
        status: ForecastStatus::Pending,
    }
}

/// One step applied to a ledger entry.
#[derive(Debug, Clone)]
enum Op {
    Acquire(u8),
    Release { lease: u8, kind: u8 },
    Commit(u8),
    Advance(u16),
    Reclaim,
    Close(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<u8>().prop_map(Op::Acquire),
        3 => (any::<u8>(), 0u8..5).prop_map(|(lease, kind)| Op::Release { lease, kind }),
        2 => any::<u8>().prop_map(Op::Commit),
        2 => (0u16..600).prop_map(Op::Advance),
        1 => Just(Op::Reclaim),
        1 => any::<u8>().prop_map(Op::Close),
    ]
}

fn kind_of(n: u8) -> FailureKind {
    match n {
        0 => FailureKind::Transient,
        1 => FailureKind::DataNotReady,
        2 => FailureKind::Validation,
        3 => FailureKind::Internal,
        _ => FailureKind::LeaseExpired,
    }
}

fn pick(leases: &[Lease], n: u8) -> Option<&Lease> {
    if leases.is_empty() {
        None
    } else {
        leases.get(usize::from(n) % leases.len())
    }
}

proptest! {
    #[test]
    fn due_iff_trigger_time_reached(lead in 0u64..14_400, offset in -20_000i64..20_000) {
        let event = game();
        let as_of = start() + chrono::Duration::seconds(offset);
        let lead_time = Duration::from_secs(lead);
        let trigger_at = start() - chrono::Duration::seconds(i64::try_from(lead).unwrap());
        prop_assert_eq!(event.is_due(as_of, lead_time), as_of >= trigger_at);
    }

    #[test]
    fn scheduler_never_generates_before_trigger(lead_mins in 1i64..180, offset_mins in -400i64..-1) {
        let as_of = start() + chrono::Duration::minutes(offset_mins);
        let premature = as_of < start() - chrono::Duration::minutes(lead_mins);

        let calls = block_on(async {
            let events = Arc::new(InMemoryEventSource::new());
            let data = Arc::new(InMemoryDataStore::new());
            let event = game();
            let fresh = start() - chrono::Duration::hours(1);
            let stats = TeamStats { games_sampled: 5, points: 115.0, rebounds: 43.0, assists: 27.0 };
            data.set_stats(event.home.id.clone(), Refreshed::new(stats.clone(), fresh)).unwrap();
            data.set_stats(event.away.id.clone(), Refreshed::new(stats, fresh)).unwrap();
            data.set_odds(
                event.id.clone(),
                Refreshed::new(Odds { spread: 2.5, home_moneyline: None, away_moneyline: None, total: None }, fresh),
            )
            .unwrap();
            events.upsert(event).unwrap();

            let registry = Arc::new(EventRegistry::new(events, Duration::from_secs(1)));
            registry.refresh(as_of).await.unwrap();
            let generator = Arc::new(ScriptedGenerator::always(
                r#"{"pick":"away","confidence":0.55,"rationale":"Pace mismatch."}"#,
            ));
            let scheduler = TriggerScheduler::new(
                SchedulerConfig {
                    lead_time: Duration::from_secs(u64::try_from(lead_mins * 60).unwrap()),
                    tick_interval: Duration::from_secs(60),
                    max_concurrency: 1,
                    stale_lease_threshold: Duration::from_secs(240),
                },
                registry,
                Arc::new(ContextAssembler::new(data.clone(), data, AssemblerConfig::default())),
                Arc::new(GenerationClient::new(generator.clone(), Duration::from_secs(5))),
                Arc::new(InMemoryLedger::default()),
                Arc::new(InMemoryGateway::new()),
            );
            let summary = scheduler.run_once(as_of).await.unwrap();
            assert_eq!(summary.committed, usize::from(!premature));
            generator.calls()
        });

        if premature {
            prop_assert_eq!(calls, 0);
        } else {
            prop_assert_eq!(calls, 1);
        }
    }

    #[test]
    fn ledger_entry_invariants_hold(ops in prop::collection::vec(arb_op(), 1..60)) {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(120),
            data_retry_delay: Duration::from_secs(30),
            max_data_waits: 4,
        };
        let threshold = Duration::from_secs(240);
        let owners: Vec<OwnerToken> = (0..3).map(|_| OwnerToken::generate()).collect();
        let mut entry = LedgerEntry::new(EventId::new("g1").unwrap(), start());
        let mut now = start();
        let mut leases: Vec<Lease> = Vec::new();
        let mut committed_forecast: Option<ForecastRecord> = None;
        let mut failures_seen = 0;

        for op in ops {
            let was_terminal = entry.terminal;
            match op {
                Op::Acquire(n) => {
                    let owner = owners[usize::from(n) % owners.len()];
                    if let AcquireResult::Acquired(lease) = entry.acquire(owner, now) {
                        prop_assert!(leases.iter().all(|l| l.sequence < lease.sequence));
                        leases.push(lease);
                    }
                }
                Op::Release { lease, kind } => {
                    if let Some(lease) = pick(&leases, lease).cloned() {
                        let failure = FailureRecord::new(lease.attempt, kind_of(kind), "boom", now);
                        entry.release(&lease, failure, &policy, now);
                    }
                }
                Op::Commit(n) => {
                    if let Some(lease) = pick(&leases, n).cloned() {
                        let holds = entry.holds(&lease);
                        let result = entry.commit(&lease, &pending(lease.attempt), now).unwrap();
                        prop_assert_eq!(result.is_committed(), holds);
                        if result.is_committed() {
                            committed_forecast = entry.forecast.clone();
                        }
                    }
                }
                Op::Advance(secs) => now += chrono::Duration::seconds(i64::from(secs)),
                Op::Reclaim => {
                    entry.reclaim(threshold, &policy, now);
                }
                Op::Close(n) => {
                    let lease = pick(&leases, n).cloned();
                    entry.close(lease.as_ref(), "canceled", now);
                }
            }

            prop_assert!(entry.attempt_count <= policy.max_attempts);
            prop_assert!(entry.data_wait_count <= policy.max_data_waits);
            prop_assert!(entry.failures.len() >= failures_seen);
            failures_seen = entry.failures.len();
            if entry.state == LedgerState::InProgress {
                prop_assert!(entry.owner.is_some());
            }
            if entry.terminal.is_some() {
                prop_assert_eq!(entry.state, LedgerState::Failed);
            }
            if was_terminal.is_some() {
                prop_assert_eq!(entry.terminal, was_terminal);
            }
            if let Some(forecast) = &committed_forecast {
                prop_assert_eq!(entry.state, LedgerState::Committed);
                prop_assert_eq!(entry.forecast.as_ref(), Some(forecast));
                prop_assert_eq!(forecast.status, ForecastStatus::Committed);
            }
        }
    }
}
