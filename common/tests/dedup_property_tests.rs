// Property-based tests for event cooldown deduplication

use common::dedup::{EventDeduplicator, InMemoryTriggerStore, TriggerStore};
use proptest::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

/// Reference model: a dispatch is allowed iff it is the first, or the gap
/// since the last *allowed* dispatch is at least the cooldown.
fn reference_decisions(times: &[i64], cooldown_ms: i64) -> Vec<bool> {
    let mut last_allowed: Option<i64> = None;
    times
        .iter()
        .map(|&now| match last_allowed {
            None => {
                last_allowed = Some(now);
                true
            }
            Some(last) if now - last >= cooldown_ms => {
                last_allowed = Some(now);
                true
            }
            Some(_) => false,
        })
        .collect()
}

fn run_sequence(times: &[i64], cooldown_ms: i64) -> Vec<bool> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("tokio runtime");

    runtime.block_on(async {
        let dedup = EventDeduplicator::new(Arc::new(InMemoryTriggerStore::new()));
        let subscription = Uuid::new_v4();

        let mut decisions = Vec::with_capacity(times.len());
        for &now in times {
            decisions.push(
                dedup
                    .should_dispatch(subscription, "host:target", cooldown_ms, now)
                    .await,
            );
        }
        decisions
    })
}

/// *For any* ordered sequence of event times and any cooldown, the allowed
/// dispatches are exactly those the reference cooldown fold allows:
/// suppressed attempts never push the cooldown forward.
#[test]
fn property_dispatch_decisions_match_the_cooldown_fold() {
    proptest!(|(
        gaps in prop::collection::vec(0i64..200_000, 1..30),
        cooldown_ms in 1i64..120_000,
    )| {
        let mut now = 0i64;
        let times: Vec<i64> = gaps
            .iter()
            .map(|gap| {
                now += gap;
                now
            })
            .collect();

        let decisions = run_sequence(&times, cooldown_ms);
        prop_assert_eq!(decisions, reference_decisions(&times, cooldown_ms));
    });
}

/// *For any* pair of correlation keys, interleaving their event streams
/// changes nothing: cooldown state is scoped per key.
#[test]
fn property_correlation_keys_are_independent() {
    proptest!(|(
        gaps_a in prop::collection::vec(0i64..120_000, 1..15),
        gaps_b in prop::collection::vec(0i64..120_000, 1..15),
        cooldown_ms in 1i64..60_000,
    )| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("tokio runtime");

        let (interleaved_a, interleaved_b, solo_a, solo_b) = runtime.block_on(async {
            let subscription = Uuid::new_v4();

            let times = |gaps: &[i64]| {
                let mut now = 0i64;
                gaps.iter()
                    .map(|gap| {
                        now += gap;
                        now
                    })
                    .collect::<Vec<_>>()
            };
            let times_a = times(&gaps_a);
            let times_b = times(&gaps_b);

            // Interleaved against one shared store.
            let shared = EventDeduplicator::new(Arc::new(InMemoryTriggerStore::new()));
            let mut interleaved_a = Vec::new();
            let mut interleaved_b = Vec::new();
            for i in 0..times_a.len().max(times_b.len()) {
                if let Some(&now) = times_a.get(i) {
                    interleaved_a
                        .push(shared.should_dispatch(subscription, "a", cooldown_ms, now).await);
                }
                if let Some(&now) = times_b.get(i) {
                    interleaved_b
                        .push(shared.should_dispatch(subscription, "b", cooldown_ms, now).await);
                }
            }

            // Each key alone against a fresh store.
            let solo = EventDeduplicator::new(Arc::new(InMemoryTriggerStore::new()));
            let mut solo_a = Vec::new();
            for &now in &times_a {
                solo_a.push(solo.should_dispatch(subscription, "a", cooldown_ms, now).await);
            }
            let mut solo_b = Vec::new();
            for &now in &times_b {
                solo_b.push(solo.should_dispatch(subscription, "b", cooldown_ms, now).await);
            }

            (interleaved_a, interleaved_b, solo_a, solo_b)
        });

        prop_assert_eq!(interleaved_a, solo_a);
        prop_assert_eq!(interleaved_b, solo_b);
    });
}

/// *For any* burst of same-timestamp events for one key, exactly one wins
/// the trigger, no matter how the store calls interleave.
#[test]
fn property_same_instant_burst_allows_exactly_one() {
    proptest!(|(burst in 2usize..20, cooldown_ms in 1i64..60_000)| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("tokio runtime");

        let allowed = runtime.block_on(async {
            let store = Arc::new(InMemoryTriggerStore::new());
            let subscription = Uuid::new_v4();

            let mut handles = Vec::new();
            for _ in 0..burst {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    store
                        .get_or_upsert_trigger(subscription, "host:target", 1_000, cooldown_ms)
                        .await
                        .unwrap()
                }));
            }

            let mut allowed = 0usize;
            for handle in handles {
                if handle.await.unwrap() {
                    allowed += 1;
                }
            }
            allowed
        });

        prop_assert_eq!(allowed, 1);
    });
}
