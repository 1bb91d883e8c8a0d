use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::{
    db::{helpers::row_to_record, Database},
    error::ActigramError,
    models::EpochRecord,
    store::{EpochPredicate, EpochStore, RecordRewrite, RecordUpdate},
};

const SELECT_COLUMNS: &str =
    "SELECT timestamp, epoch_duration_minutes, tracker_score, history_score, activity_score
     FROM epochs";

fn upsert(conn: &Connection, record: &EpochRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO epochs (timestamp, epoch_duration_minutes, tracker_score, history_score, activity_score)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(timestamp) DO UPDATE SET
             epoch_duration_minutes = excluded.epoch_duration_minutes,
             tracker_score = excluded.tracker_score,
             history_score = excluded.history_score,
             activity_score = excluded.activity_score",
        params![
            record.timestamp,
            record.epoch_duration_minutes,
            record.tracker_score,
            record.history_score,
            record.activity_score,
        ],
    )
    .with_context(|| format!("failed to upsert epoch {}", record.timestamp))?;
    Ok(())
}

fn select_one(conn: &Connection, timestamp: i64) -> Result<Option<EpochRecord>> {
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE timestamp = ?1"))?;
    let mut rows = stmt.query(params![timestamp])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_record(row)?)),
        None => Ok(None),
    }
}

fn select_range(conn: &Connection, start: Option<i64>, end: Option<i64>) -> Result<Vec<EpochRecord>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLUMNS}
         WHERE (?1 IS NULL OR timestamp >= ?1)
           AND (?2 IS NULL OR timestamp <= ?2)
         ORDER BY timestamp ASC"
    ))?;

    let mut rows = stmt.query(params![start, end])?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(row_to_record(row)?);
    }
    Ok(records)
}

fn delete_one(conn: &Connection, timestamp: i64) -> Result<()> {
    conn.execute("DELETE FROM epochs WHERE timestamp = ?1", params![timestamp])
        .with_context(|| format!("failed to delete epoch {timestamp}"))?;
    Ok(())
}

impl Database {
    pub async fn count_epochs(&self) -> Result<usize> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM epochs", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

#[async_trait]
impl EpochStore for Database {
    async fn get(&self, timestamp: i64) -> crate::Result<Option<EpochRecord>> {
        self.execute(move |conn| select_one(conn, timestamp))
            .await
            .map_err(ActigramError::from)
    }

    async fn put(&self, record: EpochRecord) -> crate::Result<()> {
        record.validate()?;
        self.execute(move |conn| upsert(conn, &record))
            .await
            .map_err(ActigramError::from)
    }

    async fn get_range(
        &self,
        start: Option<i64>,
        end: Option<i64>,
    ) -> crate::Result<Vec<EpochRecord>> {
        self.execute(move |conn| select_range(conn, start, end))
            .await
            .map_err(ActigramError::from)
    }

    async fn delete_where(&self, predicate: EpochPredicate) -> crate::Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let doomed: Vec<i64> = select_range(&tx, None, None)?
                .iter()
                .filter(|record| predicate(*record))
                .map(|record| record.timestamp)
                .collect();
            for timestamp in &doomed {
                delete_one(&tx, *timestamp)?;
            }
            tx.commit().context("failed to commit epoch deletion")?;
            Ok(doomed.len())
        })
        .await
        .map_err(ActigramError::from)
    }

    async fn clear(&self) -> crate::Result<()> {
        self.execute(|conn| {
            conn.execute("DELETE FROM epochs", [])
                .context("failed to clear epochs")?;
            Ok(())
        })
        .await
        .map_err(ActigramError::from)
    }

    async fn update(
        &self,
        timestamp: i64,
        update: RecordUpdate,
    ) -> crate::Result<Option<EpochRecord>> {
        // Domain errors from `update` must reach the caller unchanged, so the
        // task returns them inside the anyhow result instead of through it.
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let existing = select_one(&tx, timestamp)?;
            let next = match update(existing) {
                Ok(next) => next,
                Err(err) => return Ok(Err(err)),
            };
            match &next {
                Some(record) => {
                    if let Err(err) = record.validate() {
                        return Ok(Err(err));
                    }
                    upsert(&tx, record)?;
                }
                None => delete_one(&tx, timestamp)?,
            }
            tx.commit().context("failed to commit epoch update")?;
            Ok(Ok(next))
        })
        .await?
    }

    async fn rewrite(&self, rewrite: RecordRewrite) -> crate::Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let existing = select_range(&tx, None, None)?;
            let next = match rewrite(existing) {
                Ok(next) => next,
                Err(err) => return Ok(Err(err)),
            };
            if let Some(err) = next.iter().find_map(|record| record.validate().err()) {
                return Ok(Err(err));
            }
            tx.execute("DELETE FROM epochs", [])
                .context("failed to clear epochs for rewrite")?;
            for record in &next {
                upsert(&tx, record)?;
            }
            tx.commit().context("failed to commit epoch rewrite")?;
            Ok(Ok(next.len()))
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timestamp: i64, tracker: Option<u8>, history: Option<u8>) -> EpochRecord {
        EpochRecord {
            timestamp,
            epoch_duration_minutes: 15,
            tracker_score: tracker,
            history_score: history,
            activity_score: EpochRecord::combined_score(tracker, history),
        }
    }

    #[tokio::test]
    async fn put_overwrites_by_timestamp_and_range_is_ordered() {
        let db = Database::open_in_memory().unwrap();
        db.put(record(3_000, Some(10), None)).await.unwrap();
        db.put(record(1_000, Some(20), None)).await.unwrap();
        db.put(record(2_000, None, Some(30))).await.unwrap();
        db.put(record(1_000, Some(25), None)).await.unwrap();

        let all = db.get_range(None, None).await.unwrap();
        let stamps: Vec<i64> = all.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![1_000, 2_000, 3_000]);
        assert_eq!(all[0].tracker_score, Some(25));
        assert_eq!(db.count_epochs().await.unwrap(), 3);

        let middle = db.get_range(Some(1_500), Some(2_500)).await.unwrap();
        assert_eq!(middle.len(), 1);
        assert_eq!(middle[0].history_score, Some(30));
    }

    #[tokio::test]
    async fn put_rejects_invalid_records() {
        let db = Database::open_in_memory().unwrap();
        let mut bad = record(1_000, Some(10), None);
        bad.epoch_duration_minutes = 0;
        let err = db.put(bad).await.unwrap_err();
        assert!(matches!(err, ActigramError::InvalidRecord(_)));
        assert!(db.get(1_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_where_counts_removed_rows() {
        let db = Database::open_in_memory().unwrap();
        for ts in [1_000, 2_000, 3_000, 4_000] {
            db.put(record(ts, Some(50), None)).await.unwrap();
        }
        let removed = db
            .delete_where(Box::new(|r: &EpochRecord| r.timestamp < 2_500))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(db.count_epochs().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn update_can_create_modify_and_delete() {
        let db = Database::open_in_memory().unwrap();

        let created = db
            .update(
                5_000,
                Box::new(|existing: Option<EpochRecord>| {
                    assert!(existing.is_none());
                    Ok(Some(record(5_000, Some(40), None)))
                }),
            )
            .await
            .unwrap();
        assert_eq!(created.unwrap().activity_score, 40);

        db.update(
            5_000,
            Box::new(|existing: Option<EpochRecord>| {
                let mut record = existing.expect("record exists");
                record.history_score = Some(90);
                record.recompute_activity();
                Ok(Some(record))
            }),
        )
        .await
        .unwrap();
        assert_eq!(db.get(5_000).await.unwrap().unwrap().activity_score, 90);

        db.update(5_000, Box::new(|_: Option<EpochRecord>| Ok(None))).await.unwrap();
        assert!(db.get(5_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_rewrite_leaves_data_untouched() {
        let db = Database::open_in_memory().unwrap();
        db.put(record(1_000, Some(10), None)).await.unwrap();

        let err = db
            .rewrite(Box::new(|_: Vec<EpochRecord>| Err(ActigramError::import("bad payload"))))
            .await
            .unwrap_err();
        assert!(matches!(err, ActigramError::ImportFormat(_)));
        assert_eq!(db.count_epochs().await.unwrap(), 1);

        let count = db
            .rewrite(Box::new(|mut records: Vec<EpochRecord>| {
                records.push(record(2_000, None, Some(20)));
                Ok(records)
            }))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let db = Database::open_in_memory().unwrap();
        db.put(record(1_000, Some(10), None)).await.unwrap();
        db.clear().await.unwrap();
        assert!(db.get_range(None, None).await.unwrap().is_empty());
    }
}
