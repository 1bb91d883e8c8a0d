use std::convert::TryFrom;

use anyhow::{anyhow, Result};
use rusqlite::Row;

use crate::models::EpochRecord;

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} contains out-of-range value {value}"))
}

pub fn to_score(value: i64, field: &str) -> Result<u8> {
    u8::try_from(value)
        .ok()
        .filter(|score| *score <= 100)
        .ok_or_else(|| anyhow!("{field} contains invalid score {value}"))
}

pub fn to_optional_score(value: Option<i64>, field: &str) -> Result<Option<u8>> {
    value.map(|raw| to_score(raw, field)).transpose()
}

pub fn row_to_record(row: &Row) -> Result<EpochRecord> {
    let duration: i64 = row.get("epoch_duration_minutes")?;
    let tracker: Option<i64> = row.get("tracker_score")?;
    let history: Option<i64> = row.get("history_score")?;
    let activity: i64 = row.get("activity_score")?;

    Ok(EpochRecord {
        timestamp: row.get("timestamp")?,
        epoch_duration_minutes: to_u32(duration, "epoch_duration_minutes")?,
        tracker_score: to_optional_score(tracker, "tracker_score")?,
        history_score: to_optional_score(history, "history_score")?,
        activity_score: to_score(activity, "activity_score")?,
    })
}
