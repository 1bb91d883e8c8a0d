//! Pure reconciliation rules. The store-facing [`super::MergeEngine`] runs these
//! inside single store transactions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{Contribution, EpochRecord};

/// Visits per bucket needed for a full history score.
const VISITS_FOR_FULL_SCORE: u32 = 10;

/// Writes the fields present in `contribution` over `existing` (or a fresh
/// record) and recomputes the authoritative score.
pub fn fold_contribution(
    existing: Option<EpochRecord>,
    timestamp: i64,
    contribution: Contribution,
    epoch_duration_minutes: u32,
) -> EpochRecord {
    let mut record = existing.unwrap_or(EpochRecord {
        timestamp,
        epoch_duration_minutes,
        tracker_score: None,
        history_score: None,
        activity_score: 0,
    });
    if let Some(score) = contribution.tracker_score {
        record.tracker_score = Some(score);
    }
    if let Some(score) = contribution.history_score {
        record.history_score = Some(score);
    }
    record.recompute_activity();
    record
}

/// Unions `incoming` into `existing` by timestamp. On a shared timestamp the
/// strictly higher `activity_score` wins; ties keep what was there first.
/// Output is in ascending timestamp order.
pub fn merge_records(existing: Vec<EpochRecord>, incoming: Vec<EpochRecord>) -> Vec<EpochRecord> {
    let mut merged: BTreeMap<i64, EpochRecord> = BTreeMap::new();
    for record in existing.into_iter().chain(incoming) {
        match merged.get(&record.timestamp) {
            Some(current) if record.activity_score <= current.activity_score => {}
            _ => {
                merged.insert(record.timestamp, record);
            }
        }
    }
    merged.into_values().collect()
}

/// One entry of a browsing-history export. Only the visit time matters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryVisit {
    /// Milliseconds since the Unix epoch; fractional values are accepted.
    #[serde(default, alias = "visit_time")]
    pub visit_time: Option<f64>,
}

impl HistoryVisit {
    pub fn at(millis: i64) -> Self {
        Self {
            visit_time: Some(millis as f64),
        }
    }
}

/// Counts visits per epoch bucket. Buckets start at multiples of the epoch length.
pub fn bucket_visits(visit_times: impl IntoIterator<Item = i64>, epoch_duration_ms: i64) -> BTreeMap<i64, u32> {
    let mut buckets = BTreeMap::new();
    for visit_time in visit_times {
        let bucket_start = visit_time.div_euclid(epoch_duration_ms) * epoch_duration_ms;
        *buckets.entry(bucket_start).or_insert(0u32) += 1;
    }
    buckets
}

pub fn history_score(visit_count: u32) -> u8 {
    visit_count
        .saturating_mul(100 / VISITS_FOR_FULL_SCORE)
        .min(100) as u8
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRemoval {
    /// Records that lost their history score but still hold tracker data.
    pub stripped: usize,
    /// Records that held nothing but history and were dropped.
    pub deleted: usize,
}

/// Removes every history contribution. Records left without a tracker score
/// and with zero activity are dropped.
pub fn strip_history(records: Vec<EpochRecord>) -> (Vec<EpochRecord>, HistoryRemoval) {
    let mut removal = HistoryRemoval::default();
    let mut kept = Vec::with_capacity(records.len());
    for mut record in records {
        if record.history_score.take().is_none() {
            kept.push(record);
            continue;
        }
        record.activity_score = record.tracker_score.unwrap_or(0);
        if record.activity_score == 0 && record.tracker_score.is_none() {
            removal.deleted += 1;
        } else {
            removal.stripped += 1;
            kept.push(record);
        }
    }
    (kept, removal)
}


#[cfg(test)]
mod properties {
    use proptest::prelude::*;

    use super::*;

    fn arb_score() -> impl Strategy<Value = u8> {
        0u8..=100
    }

    fn arb_existing() -> impl Strategy<Value = Option<EpochRecord>> {
        prop::option::of(
            (prop::option::of(arb_score()), prop::option::of(arb_score()), 1u32..=60).prop_map(
                |(tracker_score, history_score, minutes)| {
                    let mut record = EpochRecord {
                        timestamp: 0,
                        epoch_duration_minutes: minutes,
                        tracker_score,
                        history_score,
                        activity_score: 0,
                    };
                    record.recompute_activity();
                    record
                },
            ),
        )
    }

    /// Distinct timestamps, each with a consistent record.
    fn arb_records() -> impl Strategy<Value = Vec<EpochRecord>> {
        prop::collection::btree_map(
            -1_000i64..1_000,
            (prop::option::of(arb_score()), prop::option::of(arb_score())),
            0..40,
        )
        .prop_map(|by_slot| {
            by_slot
                .into_iter()
                .map(|(slot, (tracker_score, history_score))| {
                    let mut record = EpochRecord {
                        timestamp: slot * 900_000,
                        epoch_duration_minutes: 15,
                        tracker_score,
                        history_score,
                        activity_score: 0,
                    };
                    record.recompute_activity();
                    record
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn tracker_and_history_contributions_commute(
            existing in arb_existing(),
            tracker in arb_score(),
            history in arb_score(),
        ) {
            let tracker_first = fold_contribution(
                Some(fold_contribution(existing.clone(), 0, Contribution::tracker(tracker), 15)),
                0,
                Contribution::history(history),
                15,
            );
            let history_first = fold_contribution(
                Some(fold_contribution(existing, 0, Contribution::history(history), 15)),
                0,
                Contribution::tracker(tracker),
                15,
            );

            prop_assert_eq!(&tracker_first, &history_first);
            prop_assert_eq!(tracker_first.activity_score, tracker.max(history));
        }

        #[test]
        fn merging_a_set_with_itself_changes_nothing(records in arb_records()) {
            prop_assert_eq!(merge_records(records.clone(), records.clone()), records);
        }

        #[test]
        fn merged_output_is_sorted_and_never_regresses(
            existing in arb_records(),
            incoming in arb_records(),
        ) {
            let merged = merge_records(existing.clone(), incoming.clone());
            prop_assert!(merged.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));
            for record in existing.iter().chain(&incoming) {
                let kept = merged.iter().find(|m| m.timestamp == record.timestamp);
                prop_assert!(kept.is_some_and(|m| m.activity_score >= record.activity_score));
            }
        }
    }
}
