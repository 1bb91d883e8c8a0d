use serde::{Deserialize, Serialize};

use crate::{models::TrackerContribution, oracle::IdleState};

/// Whole seconds from `from` to `to`, never negative.
pub fn elapsed_seconds(from_ms: i64, to_ms: i64) -> u64 {
    u64::try_from((to_ms - from_ms).div_euclid(1000)).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingState {
    pub is_tracking: bool,
    pub last_check_time: i64,
    pub last_observed_state: IdleState,
}

impl Default for TrackingState {
    fn default() -> Self {
        Self {
            is_tracking: false,
            last_check_time: 0,
            last_observed_state: IdleState::Idle,
        }
    }
}

impl TrackingState {
    pub fn seeded(now_ms: i64, observed: IdleState) -> Self {
        Self {
            is_tracking: true,
            last_check_time: now_ms,
            last_observed_state: observed,
        }
    }

    /// Moves the check time forward. A clock that jumped backwards leaves it in place.
    pub fn mark_checked(&mut self, now_ms: i64) {
        self.last_check_time = self.last_check_time.max(now_ms);
    }
}

/// The epoch currently accumulating activity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentEpoch {
    pub start_time: i64,
    pub active_seconds: u64,
    pub total_seconds: u64,
    /// Snapshot taken when the epoch began; later settings changes apply to the next epoch.
    pub epoch_duration_minutes: u32,
}

impl CurrentEpoch {
    pub fn begin(start_ms: i64, epoch_duration_minutes: u32) -> Self {
        Self {
            start_time: start_ms,
            active_seconds: 0,
            total_seconds: 0,
            epoch_duration_minutes,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        i64::from(self.epoch_duration_minutes) * 60 * 1000
    }

    /// Accounts `delta_secs` that elapsed up to `now_ms` in `state`.
    pub fn record(&mut self, now_ms: i64, delta_secs: u64, state: IdleState) {
        self.total_seconds = elapsed_seconds(self.start_time, now_ms);
        if state.is_active() {
            self.active_seconds = self.active_seconds.saturating_add(delta_secs);
        }
        // Overlapping heartbeat/notification intervals or a stale check time
        // after suspend can overshoot; active time never exceeds wall time.
        self.active_seconds = self.active_seconds.min(self.total_seconds);
    }

    pub fn is_complete(&self) -> bool {
        (self.total_seconds as i64).saturating_mul(1000) >= self.duration_ms()
    }

    pub fn activity_score(&self) -> u8 {
        if self.total_seconds == 0 {
            return 0;
        }
        let ratio = self.active_seconds as f64 / self.total_seconds as f64;
        (ratio * 100.0).round().clamp(0.0, 100.0) as u8
    }

    pub fn contribution(&self) -> TrackerContribution {
        TrackerContribution {
            timestamp: self.start_time,
            tracker_score: self.activity_score(),
            epoch_duration_minutes: self.epoch_duration_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn elapsed_seconds_floors_and_never_goes_negative() {
        assert_eq!(elapsed_seconds(T0, T0 + 1_999), 1);
        assert_eq!(elapsed_seconds(T0, T0 + 2_000), 2);
        assert_eq!(elapsed_seconds(T0, T0 - 5_000), 0);
    }

    #[test]
    fn active_time_is_clamped_to_wall_time() {
        let mut epoch = CurrentEpoch::begin(T0, 15);
        epoch.record(T0 + 30_000, 30, IdleState::Active);
        assert_eq!((epoch.active_seconds, epoch.total_seconds), (30, 30));

        // A stale check time claims far more than the wall clock allows.
        epoch.record(T0 + 60_000, 500, IdleState::Active);
        assert_eq!((epoch.active_seconds, epoch.total_seconds), (60, 60));
    }

    #[test]
    fn idle_time_only_grows_total() {
        let mut epoch = CurrentEpoch::begin(T0, 15);
        epoch.record(T0 + 40_000, 40, IdleState::Idle);
        assert_eq!((epoch.active_seconds, epoch.total_seconds), (0, 40));
    }

    #[test]
    fn completes_exactly_at_duration() {
        let mut epoch = CurrentEpoch::begin(T0, 15);
        epoch.record(T0 + 899_999, 0, IdleState::Idle);
        assert!(!epoch.is_complete());
        epoch.record(T0 + 900_000, 0, IdleState::Idle);
        assert!(epoch.is_complete());
    }

    #[test]
    fn score_is_rounded_percentage() {
        let epoch = CurrentEpoch {
            start_time: T0,
            active_seconds: 450,
            total_seconds: 900,
            epoch_duration_minutes: 15,
        };
        assert_eq!(epoch.activity_score(), 50);
        assert_eq!(
            epoch.contribution(),
            TrackerContribution {
                timestamp: T0,
                tracker_score: 50,
                epoch_duration_minutes: 15,
            }
        );

        let rounding = CurrentEpoch {
            active_seconds: 2,
            total_seconds: 3,
            ..epoch
        };
        assert_eq!(rounding.activity_score(), 67);
        assert_eq!(CurrentEpoch::begin(T0, 15).activity_score(), 0);
    }

    #[test]
    fn check_time_never_moves_backwards() {
        let mut tracking = TrackingState::seeded(T0, IdleState::Active);
        tracking.mark_checked(T0 - 10_000);
        assert_eq!(tracking.last_check_time, T0);
        tracking.mark_checked(T0 + 10_000);
        assert_eq!(tracking.last_check_time, T0 + 10_000);
    }
}
