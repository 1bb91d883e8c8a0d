use std::{collections::VecDeque, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};

use crate::{
    error::Result,
    merge::MergeEngine,
    models::TrackerContribution,
    oracle::{self, IdleOracle, IdleState},
    settings::SettingsStore,
    store::{ConfigStore, CURRENT_EPOCH_KEY, TRACKING_STATE_KEY},
    utils::Clock,
};

use super::state::{elapsed_seconds, CurrentEpoch, TrackingState};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Collaborators the engine needs. Grouped so callers wire them once.
#[derive(Clone)]
pub struct EngineDeps {
    pub settings: SettingsStore,
    pub config: Arc<dyn ConfigStore>,
    pub merge: MergeEngine,
    pub oracle: Arc<dyn IdleOracle>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub tracking: TrackingState,
    pub current_epoch: Option<CurrentEpoch>,
    pub pending_contributions: usize,
}

/// Turns idle/active observations plus elapsed wall time into epochs.
///
/// Owns the tracking state and the in-progress epoch. Every public operation
/// is one tick: persistence failures are logged and the in-memory state is
/// kept so the next tick retries; nothing is returned as an error.
pub struct EpochEngine {
    deps: EngineDeps,
    tracking: TrackingState,
    current: Option<CurrentEpoch>,
    pending: VecDeque<TrackerContribution>,
    restored: bool,
}

impl EpochEngine {
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            deps,
            tracking: TrackingState::default(),
            current: None,
            pending: VecDeque::new(),
            restored: false,
        }
    }

    pub fn oracle(&self) -> &Arc<dyn IdleOracle> {
        &self.deps.oracle
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.is_tracking
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            tracking: self.tracking,
            current_epoch: self.current,
            pending_contributions: self.pending.len(),
        }
    }

    /// Begins tracking. A no-op while already tracking.
    pub async fn start(&mut self) -> TrackingState {
        if self.tracking.is_tracking {
            log_debug!("start ignored: already tracking");
            return self.tracking;
        }

        let settings = self.deps.settings.refresh().await;
        let observed = oracle::observe(self.deps.oracle.as_ref(), settings.idle_threshold_seconds).await;
        let now = self.deps.clock.now_ms();

        if !self.restored {
            self.restore_current_epoch().await;
            self.restored = true;
        }

        // Time spent while not running is never attributed: the check time
        // restarts at now, whatever the persisted snapshot said.
        let mut tracking = TrackingState::seeded(now, observed);
        tracking.mark_checked(self.tracking.last_check_time);
        self.tracking = tracking;

        if self.current.is_none() {
            self.current = Some(CurrentEpoch::begin(now, settings.epoch_duration_minutes));
            self.persist_current().await;
        }
        self.persist_tracking().await;

        log_info!(
            "Activity tracking started ({}), epoch length {} min",
            observed.as_str(),
            settings.epoch_duration_minutes
        );
        self.tracking
    }

    /// Stops tracking. A no-op while stopped.
    pub async fn stop(&mut self) -> TrackingState {
        if !self.tracking.is_tracking {
            return self.tracking;
        }
        self.tracking.is_tracking = false;
        self.persist_tracking().await;
        log_info!("Activity tracking stopped");
        self.tracking
    }

    /// Periodic tick: accounts elapsed time, then re-reads the oracle in case a
    /// transition notification was missed. A disagreement only changes how
    /// future time is attributed.
    pub async fn on_heartbeat(&mut self) {
        if !self.tracking.is_tracking {
            log_debug!("heartbeat ignored: not tracking");
            return;
        }

        let now = self.deps.clock.now_ms();
        self.advance(now).await;

        let threshold = self.deps.settings.current().idle_threshold_seconds;
        let fresh = oracle::observe(self.deps.oracle.as_ref(), threshold).await;
        if fresh != self.tracking.last_observed_state {
            log_info!(
                "Heartbeat resynced idle state {} -> {}",
                self.tracking.last_observed_state.as_str(),
                fresh.as_str()
            );
            self.tracking.last_observed_state = fresh;
            self.persist_tracking().await;
        }
    }

    /// Transition notification. Time since the last check belongs to the state
    /// held before this call; `new_state` only applies from now on.
    pub async fn on_idle_state_change(&mut self, new_state: IdleState) {
        if !self.tracking.is_tracking {
            log_debug!("idle state change ignored: not tracking");
            return;
        }

        let now = self.deps.clock.now_ms();
        self.advance(now).await;

        if self.tracking.last_observed_state != new_state {
            log_debug!("Idle state changed to {}", new_state.as_str());
        }
        self.tracking.last_observed_state = new_state;
        self.persist_tracking().await;
    }

    async fn advance(&mut self, now: i64) {
        self.flush_pending().await;

        let delta = elapsed_seconds(self.tracking.last_check_time, now);
        let state = self.tracking.last_observed_state;
        let duration = self.deps.settings.current().epoch_duration_minutes;

        let current = self
            .current
            .get_or_insert_with(|| CurrentEpoch::begin(now, duration));
        current.record(now, delta, state);
        let complete = current.is_complete();

        self.tracking.mark_checked(now);
        self.persist_tracking().await;

        if complete {
            self.finalize(now).await;
        } else {
            self.persist_current().await;
        }
    }

    async fn finalize(&mut self, now: i64) {
        let Some(finished) = self.current.take() else {
            return;
        };
        let contribution = finished.contribution();

        // The duration setting is picked up fresh at each boundary.
        let settings = self.deps.settings.refresh().await;
        self.current = Some(CurrentEpoch::begin(now, settings.epoch_duration_minutes));

        log_info!(
            "Epoch {} finalized: {}s active of {}s, score {}",
            finished.start_time,
            finished.active_seconds,
            finished.total_seconds,
            contribution.tracker_score
        );
        self.pending.push_back(contribution);
        self.flush_pending().await;
        self.persist_current().await;
    }

    /// Stores queued tracker contributions oldest first, stopping at the first
    /// transient failure so the rest are retried next tick.
    async fn flush_pending(&mut self) {
        while let Some(contribution) = self.pending.front().copied() {
            match self.deps.merge.apply_tracker(contribution).await {
                Ok(_) => {
                    self.pending.pop_front();
                }
                Err(err) if err.is_transient() => {
                    log_error!(
                        "Failed to store epoch {} ({} pending): {err}",
                        contribution.timestamp,
                        self.pending.len()
                    );
                    return;
                }
                Err(err) => {
                    log_error!("Dropping invalid epoch {}: {err}", contribution.timestamp);
                    self.pending.pop_front();
                }
            }
        }
    }

    async fn restore_current_epoch(&mut self) {
        match self.load::<CurrentEpoch>(CURRENT_EPOCH_KEY).await {
            Ok(Some(epoch)) if epoch.active_seconds <= epoch.total_seconds && epoch.epoch_duration_minutes > 0 => {
                log_info!(
                    "Restored in-progress epoch started at {} ({}s active)",
                    epoch.start_time,
                    epoch.active_seconds
                );
                self.current = Some(epoch);
            }
            Ok(Some(epoch)) => {
                log_warn!("Discarding inconsistent saved epoch {:?}", epoch);
            }
            Ok(None) => {}
            Err(err) => log_warn!("Could not restore in-progress epoch: {err}"),
        }
    }

    async fn persist_tracking(&self) {
        if let Err(err) = self.save(TRACKING_STATE_KEY, &self.tracking).await {
            log_error!("Failed to persist tracking state: {err}");
        }
    }

    async fn persist_current(&self) {
        let Some(current) = self.current.as_ref() else {
            return;
        };
        if let Err(err) = self.save(CURRENT_EPOCH_KEY, current).await {
            log_error!("Failed to persist current epoch: {err}");
        }
    }

    async fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_value(value)?;
        self.deps.config.set(key, json).await
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.deps.config.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }
}
