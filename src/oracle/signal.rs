use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::{ActigramError, Result};

use super::{IdleOracle, IdleState};

const CHANNEL_CAPACITY: usize = 16;

struct SignalState {
    last_input: DateTime<Utc>,
    locked: bool,
    reported: IdleState,
}

/// Idle oracle fed by the embedding application.
///
/// The host reports input activity (`record_input`) and lock changes
/// (`set_locked`); queries compare the time since the last input with the
/// caller's threshold. Explicit transitions are broadcast to subscribers.
pub struct IdleSignal {
    state: RwLock<SignalState>,
    sender: broadcast::Sender<IdleState>,
}

impl IdleSignal {
    pub fn new(now: DateTime<Utc>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(SignalState {
                last_input: now,
                locked: false,
                reported: IdleState::Active,
            }),
            sender,
        }
    }

    /// Marks user input at `at`; broadcasts `Active` if the last reported state was idle.
    pub fn record_input(&self, at: DateTime<Utc>) {
        let changed = match self.state.write() {
            Ok(mut guard) => {
                if at > guard.last_input {
                    guard.last_input = at;
                }
                Self::transition(&mut guard, IdleState::Active)
            }
            Err(_) => false,
        };
        if changed {
            let _ = self.sender.send(IdleState::Active);
        }
    }

    /// Reports that the host decided the user went idle (threshold elapsed, screen locked).
    pub fn report(&self, state: IdleState) {
        let changed = match self.state.write() {
            Ok(mut guard) => Self::transition(&mut guard, state),
            Err(_) => false,
        };
        if changed {
            let _ = self.sender.send(state);
        }
    }

    pub fn set_locked(&self, locked: bool) {
        if let Ok(mut guard) = self.state.write() {
            guard.locked = locked;
        }
        if locked {
            self.report(IdleState::Idle);
        }
    }

    fn transition(state: &mut SignalState, next: IdleState) -> bool {
        let changed = state.reported != next;
        state.reported = next;
        changed
    }

    fn evaluate(&self, threshold_secs: u32, now: DateTime<Utc>) -> Result<IdleState> {
        let guard = self
            .state
            .read()
            .map_err(|_| ActigramError::OracleUnavailable("idle signal lock poisoned".into()))?;
        if guard.locked {
            return Ok(IdleState::Idle);
        }
        let quiet_secs = (now - guard.last_input).num_seconds();
        if quiet_secs >= i64::from(threshold_secs) {
            Ok(IdleState::Idle)
        } else {
            Ok(IdleState::Active)
        }
    }
}

#[async_trait]
impl IdleOracle for IdleSignal {
    async fn query_state(&self, threshold_secs: u32) -> Result<IdleState> {
        self.evaluate(threshold_secs, Utc::now())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<IdleState>> {
        Some(self.sender.subscribe())
    }
}
