//! Persisted epoch records and the score contributions folded into them.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ActigramError, Result};

pub const MAX_SCORE: u8 = 100;

/// One finalized epoch, keyed by its start time in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochRecord {
    pub timestamp: i64,
    pub epoch_duration_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_score: Option<u8>,
    pub activity_score: u8,
}

impl EpochRecord {
    /// A record with no per-source scores, as produced by bulk imports.
    pub fn scored(timestamp: i64, epoch_duration_minutes: u32, activity_score: u8) -> Self {
        Self {
            timestamp,
            epoch_duration_minutes,
            tracker_score: None,
            history_score: None,
            activity_score,
        }
    }

    /// Authoritative score: max of the present source scores, absent counting as 0.
    pub fn combined_score(tracker: Option<u8>, history: Option<u8>) -> u8 {
        tracker.unwrap_or(0).max(history.unwrap_or(0))
    }

    pub fn recompute_activity(&mut self) {
        self.activity_score = Self::combined_score(self.tracker_score, self.history_score);
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    pub fn validate(&self) -> Result<()> {
        if self.epoch_duration_minutes == 0 {
            return Err(ActigramError::invalid(format!(
                "epoch at {} has zero duration",
                self.timestamp
            )));
        }
        for (field, score) in [
            ("trackerScore", self.tracker_score),
            ("historyScore", self.history_score),
            ("activityScore", Some(self.activity_score)),
        ] {
            if let Some(value) = score {
                if value > MAX_SCORE {
                    return Err(ActigramError::invalid(format!(
                        "{field} {value} out of range at {}",
                        self.timestamp
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Scores one source (or both) wants written at a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub tracker_score: Option<u8>,
    pub history_score: Option<u8>,
}

impl Contribution {
    pub fn tracker(score: u8) -> Self {
        Self {
            tracker_score: Some(score),
            history_score: None,
        }
    }

    pub fn history(score: u8) -> Self {
        Self {
            tracker_score: None,
            history_score: Some(score),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracker_score.is_none() && self.history_score.is_none()
    }
}

/// A tracker contribution produced by finalizing an epoch, waiting to be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerContribution {
    pub timestamp: i64,
    pub tracker_score: u8,
    pub epoch_duration_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    Merge,
    Replace,
}
