use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    error::{ActigramError, Result},
    models::{Contribution, EpochRecord, ImportMode, TrackerContribution, MAX_SCORE},
    store::{EpochStore, RecordRewrite, RecordUpdate},
};

use super::fold::{
    bucket_visits, fold_contribution, history_score, merge_records, strip_history, HistoryRemoval,
    HistoryVisit,
};

/// Reconciles score contributions and bulk datasets into one record per epoch.
///
/// Every operation is a single store transaction, so a finalize racing an
/// import on the same timestamp is applied one after the other.
#[derive(Clone)]
pub struct MergeEngine {
    store: Arc<dyn EpochStore>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn EpochStore>) -> Self {
        Self { store }
    }

    pub async fn apply_contribution(
        &self,
        timestamp: i64,
        contribution: Contribution,
        epoch_duration_minutes: u32,
    ) -> Result<EpochRecord> {
        validate_contribution(&contribution, epoch_duration_minutes)?;
        if contribution.is_empty() {
            return Err(ActigramError::invalid(format!(
                "contribution at {timestamp} carries no score"
            )));
        }

        let update: RecordUpdate = Box::new(move |existing: Option<EpochRecord>| {
            Ok(Some(fold_contribution(
                existing,
                timestamp,
                contribution,
                epoch_duration_minutes,
            )))
        });
        let stored = self
            .store
            .update(timestamp, update)
            .await?
            .ok_or_else(|| ActigramError::store(format!("epoch {timestamp} vanished during update")))?;
        debug!(
            "Applied contribution at {timestamp}: tracker={:?} history={:?} activity={}",
            stored.tracker_score, stored.history_score, stored.activity_score
        );
        Ok(stored)
    }

    pub async fn apply_tracker(&self, contribution: TrackerContribution) -> Result<EpochRecord> {
        self.apply_contribution(
            contribution.timestamp,
            Contribution::tracker(contribution.tracker_score),
            contribution.epoch_duration_minutes,
        )
        .await
    }

    /// Merges or replaces the stored set with `records`. Atomic: on any error
    /// nothing is written. Returns the number of records stored afterwards.
    pub async fn import_bulk(&self, records: Vec<EpochRecord>, mode: ImportMode) -> Result<usize> {
        for record in &records {
            record.validate()?;
        }
        let incoming = records.len();

        let rewrite: RecordRewrite = Box::new(move |existing: Vec<EpochRecord>| {
            Ok(match mode {
                ImportMode::Merge => merge_records(existing, records),
                ImportMode::Replace => merge_records(Vec::new(), records),
            })
        });
        let stored = self.store.rewrite(rewrite).await?;
        info!("Imported {incoming} epochs ({mode:?}); store now holds {stored}");
        Ok(stored)
    }

    /// Scores browsing-history visits per epoch bucket and folds them in as
    /// history contributions. Returns the number of buckets touched.
    pub async fn import_history(
        &self,
        visits: &[HistoryVisit],
        epoch_duration_minutes: u32,
    ) -> Result<usize> {
        if epoch_duration_minutes == 0 {
            return Err(ActigramError::invalid("epoch duration must be positive"));
        }
        let epoch_duration_ms = i64::from(epoch_duration_minutes) * 60 * 1000;

        let mut skipped = 0usize;
        let times: Vec<i64> = visits
            .iter()
            .filter_map(|visit| match visit.visit_time {
                Some(time) if time.is_finite() && time > 0.0 => Some(time.floor() as i64),
                _ => {
                    skipped += 1;
                    None
                }
            })
            .collect();
        if skipped > 0 {
            warn!("Skipped {skipped} history visits without a usable timestamp");
        }

        let buckets = bucket_visits(times, epoch_duration_ms);
        let touched = buckets.len();
        let rewrite: RecordRewrite = Box::new(move |existing: Vec<EpochRecord>| {
            let mut by_timestamp: std::collections::BTreeMap<i64, EpochRecord> = existing
                .into_iter()
                .map(|record| (record.timestamp, record))
                .collect();
            for (bucket_start, count) in buckets {
                let previous = by_timestamp.remove(&bucket_start);
                let record = fold_contribution(
                    previous,
                    bucket_start,
                    Contribution::history(history_score(count)),
                    epoch_duration_minutes,
                );
                by_timestamp.insert(bucket_start, record);
            }
            Ok(by_timestamp.into_values().collect())
        });
        self.store.rewrite(rewrite).await?;
        info!("Imported history into {touched} epochs");
        Ok(touched)
    }

    pub async fn remove_history(&self) -> Result<HistoryRemoval> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let rewrite: RecordRewrite = Box::new(move |existing: Vec<EpochRecord>| {
            let (kept, removal) = strip_history(existing);
            let _ = tx.send(removal);
            Ok(kept)
        });
        self.store.rewrite(rewrite).await?;
        let removal = rx
            .await
            .map_err(|_| ActigramError::store("history removal result lost"))?;
        info!(
            "Removed history from {} epochs, deleted {} history-only epochs",
            removal.stripped + removal.deleted,
            removal.deleted
        );
        Ok(removal)
    }

    pub async fn activity_data(&self, start: Option<i64>, end: Option<i64>) -> Result<Vec<EpochRecord>> {
        self.store.get_range(start, end).await
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.store.clear().await?;
        info!("All activity data cleared");
        Ok(())
    }
}

fn validate_contribution(contribution: &Contribution, epoch_duration_minutes: u32) -> Result<()> {
    if epoch_duration_minutes == 0 {
        return Err(ActigramError::invalid("epoch duration must be positive"));
    }
    for score in [contribution.tracker_score, contribution.history_score]
        .into_iter()
        .flatten()
    {
        if score > MAX_SCORE {
            return Err(ActigramError::invalid(format!("score {score} exceeds {MAX_SCORE}")));
        }
    }
    Ok(())
}
