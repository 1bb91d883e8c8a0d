//! JSON export and import of epoch history.
//!
//! Exports always use the `epochs` document. Imports also accept the older
//! `activityData` dump, which carried full records.

use chrono::{DateTime, SecondsFormat};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{ActigramError, Result},
    models::{EpochRecord, MAX_SCORE},
    settings::{Settings, DEFAULT_EPOCH_DURATION_MINUTES},
};

const DEFAULT_EPOCH_LENGTH_SECONDS: f64 = 900.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub epoch_length_seconds: u64,
    pub time_zone: String,
    pub epochs: Vec<ExportedEpoch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedEpoch {
    /// RFC 3339 in UTC with milliseconds.
    pub time: String,
    pub activity: u8,
}

/// Builds the export document. `records` are emitted in ascending time order.
pub fn build_export(settings: &Settings, records: &[EpochRecord]) -> ExportDocument {
    let mut sorted: Vec<&EpochRecord> = records.iter().collect();
    sorted.sort_by_key(|record| record.timestamp);

    let epochs = sorted
        .into_iter()
        .filter_map(|record| match record.start_time() {
            Some(start) => Some(ExportedEpoch {
                time: start.to_rfc3339_opts(SecondsFormat::Millis, true),
                activity: record.activity_score,
            }),
            None => {
                warn!("Skipping epoch with unrepresentable time {}", record.timestamp);
                None
            }
        })
        .collect();

    ExportDocument {
        epoch_length_seconds: u64::from(settings.epoch_duration_minutes) * 60,
        time_zone: settings.time_zone.clone(),
        epochs,
    }
}

#[derive(Deserialize)]
struct ImportedDocument {
    epoch_length_seconds: Option<f64>,
    epochs: Vec<ImportedEpoch>,
}

#[derive(Deserialize)]
struct ImportedEpoch {
    #[serde(alias = "t")]
    time: String,
    activity: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyEpoch {
    timestamp: i64,
    activity_score: f64,
    #[serde(alias = "chunkDuration")]
    epoch_duration: Option<f64>,
    tracker_score: Option<f64>,
    history_score: Option<f64>,
}

/// Parses an import payload into records. Any malformed entry fails the whole
/// payload.
pub fn parse_import(json: &str) -> Result<Vec<EpochRecord>> {
    let raw: Value = serde_json::from_str(json)
        .map_err(|err| ActigramError::import(format!("not valid JSON: {err}")))?;

    if raw.get("epochs").is_some_and(Value::is_array) {
        let document: ImportedDocument = serde_json::from_value(raw)
            .map_err(|err| ActigramError::import(format!("bad epochs document: {err}")))?;
        return parse_epochs(document);
    }
    if let Some(items) = raw.get("activityData").filter(|value| value.is_array()) {
        let legacy: Vec<LegacyEpoch> = serde_json::from_value(items.clone())
            .map_err(|err| ActigramError::import(format!("bad activityData entry: {err}")))?;
        return legacy.into_iter().map(legacy_record).collect();
    }
    Err(ActigramError::import(
        "expected an `epochs` or `activityData` array",
    ))
}

fn parse_epochs(document: ImportedDocument) -> Result<Vec<EpochRecord>> {
    let seconds = document
        .epoch_length_seconds
        .unwrap_or(DEFAULT_EPOCH_LENGTH_SECONDS);
    let minutes = duration_minutes(seconds / 60.0)?;

    document
        .epochs
        .into_iter()
        .map(|epoch| {
            let timestamp = DateTime::parse_from_rfc3339(&epoch.time)
                .map_err(|err| ActigramError::import(format!("bad time {:?}: {err}", epoch.time)))?
                .timestamp_millis();
            let activity = score(epoch.activity, "activity", timestamp)?;
            Ok(EpochRecord::scored(timestamp, minutes, activity))
        })
        .collect()
}

fn legacy_record(item: LegacyEpoch) -> Result<EpochRecord> {
    let at = item.timestamp;
    let minutes = match item.epoch_duration {
        Some(value) => duration_minutes(value)?,
        None => DEFAULT_EPOCH_DURATION_MINUTES,
    };
    let optional = |value: Option<f64>, field| value.map(|v| score(v, field, at)).transpose();

    let mut record = EpochRecord {
        timestamp: at,
        epoch_duration_minutes: minutes,
        tracker_score: optional(item.tracker_score, "trackerScore")?,
        history_score: optional(item.history_score, "historyScore")?,
        activity_score: score(item.activity_score, "activityScore", at)?,
    };
    // Source scores are authoritative; a bare activityScore is kept as given.
    if record.tracker_score.is_some() || record.history_score.is_some() {
        record.recompute_activity();
    }
    Ok(record)
}

fn score(value: f64, field: &str, at: i64) -> Result<u8> {
    if !value.is_finite() || value < 0.0 || value > f64::from(MAX_SCORE) {
        return Err(ActigramError::import(format!(
            "{field} {value} out of range at {at}"
        )));
    }
    Ok(value.round() as u8)
}

fn duration_minutes(value: f64) -> Result<u32> {
    let minutes = value.round();
    if !minutes.is_finite() || minutes < 1.0 || minutes > f64::from(u32::MAX) {
        return Err(ActigramError::import(format!(
            "epoch length of {value} minutes is not usable"
        )));
    }
    Ok(minutes as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    fn settings() -> Settings {
        Settings {
            time_zone: "Europe/Berlin".into(),
            ..Settings::default()
        }
    }

    #[test]
    fn export_is_sorted_and_uses_millisecond_utc() {
        let records = vec![
            EpochRecord::scored(T0 + 900_000, 15, 20),
            EpochRecord::scored(T0, 15, 80),
        ];
        let document = build_export(&settings(), &records);

        assert_eq!(document.epoch_length_seconds, 900);
        assert_eq!(document.time_zone, "Europe/Berlin");
        assert_eq!(
            document.epochs,
            vec![
                ExportedEpoch {
                    time: "2023-11-14T22:13:20.000Z".into(),
                    activity: 80,
                },
                ExportedEpoch {
                    time: "2023-11-14T22:28:20.000Z".into(),
                    activity: 20,
                },
            ]
        );

        let json = serde_json::to_value(&document).unwrap();
        assert!(json.get("epoch_length_seconds").is_some());
        assert!(json.get("time_zone").is_some());
    }

    #[test]
    fn exported_document_imports_back() {
        let records = vec![EpochRecord::scored(T0, 15, 42)];
        let json = serde_json::to_string(&build_export(&settings(), &records)).unwrap();
        assert_eq!(parse_import(&json).unwrap(), records);
    }

    #[test]
    fn short_time_key_and_default_length() {
        let parsed = parse_import(
            r#"{"epochs":[{"t":"2023-11-14T22:13:20Z","activity":55.4}]}"#,
        )
        .unwrap();
        assert_eq!(parsed, vec![EpochRecord::scored(T0, 15, 55)]);

        let parsed = parse_import(
            r#"{"epoch_length_seconds":300,"epochs":[{"time":"2023-11-14T23:13:20+01:00","activity":1}]}"#,
        )
        .unwrap();
        assert_eq!(parsed, vec![EpochRecord::scored(T0, 5, 1)]);
    }

    #[test]
    fn legacy_activity_data_keeps_source_scores() {
        let parsed = parse_import(&format!(
            r#"{{"activityData":[
                {{"timestamp":{T0},"activityScore":70,"epochDuration":15,"trackerScore":70,"historyScore":30}},
                {{"timestamp":{},"activityScore":10,"chunkDuration":5}}
            ]}}"#,
            T0 + 300_000
        ))
        .unwrap();

        assert_eq!(
            parsed[0],
            EpochRecord {
                timestamp: T0,
                epoch_duration_minutes: 15,
                tracker_score: Some(70),
                history_score: Some(30),
                activity_score: 70,
            }
        );
        assert_eq!(parsed[1], EpochRecord::scored(T0 + 300_000, 5, 10));
    }

    #[test]
    fn legacy_activity_score_follows_source_scores() {
        let parsed = parse_import(&format!(
            r#"{{"activityData":[
                {{"timestamp":{T0},"activityScore":10,"epochDuration":15,"trackerScore":80,"historyScore":30}},
                {{"timestamp":{},"activityScore":95,"epochDuration":15,"historyScore":40}}
            ]}}"#,
            T0 + 900_000
        ))
        .unwrap();

        assert_eq!(parsed[0].activity_score, 80);
        assert_eq!(parsed[0].tracker_score, Some(80));
        assert_eq!(parsed[0].history_score, Some(30));
        assert_eq!(parsed[1].activity_score, 40);
    }

    #[test]
    fn malformed_payloads_are_import_errors() {
        let cases = [
            "not json",
            "{}",
            r#"{"epochs":"nope"}"#,
            r#"{"epochs":[{"time":"yesterday","activity":5}]}"#,
            r#"{"epochs":[{"time":"2023-11-14T22:13:20Z","activity":101}]}"#,
            r#"{"epochs":[{"time":"2023-11-14T22:13:20Z","activity":-1}]}"#,
            r#"{"epoch_length_seconds":0,"epochs":[]}"#,
            r#"{"activityData":[{"activityScore":5}]}"#,
        ];
        for case in cases {
            let err = parse_import(case).unwrap_err();
            assert!(matches!(err, ActigramError::ImportFormat(_)), "{case}: {err:?}");
        }
    }

    #[test]
    fn empty_epoch_list_is_valid() {
        assert!(parse_import(r#"{"epochs":[]}"#).unwrap().is_empty());
    }
}
