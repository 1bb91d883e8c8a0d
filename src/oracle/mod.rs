//! Idle oracle seam: answers "is the user active right now?" and pushes
//! transitions as they happen.

mod signal;

pub use signal::IdleSignal;

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdleState {
    Active,
    #[default]
    Idle,
}

impl IdleState {
    pub fn is_active(self) -> bool {
        matches!(self, IdleState::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IdleState::Active => "active",
            IdleState::Idle => "idle",
        }
    }
}

#[async_trait]
pub trait IdleOracle: Send + Sync {
    /// Current state given an inactivity threshold in seconds.
    async fn query_state(&self, threshold_secs: u32) -> Result<IdleState>;

    /// Push channel for state transitions. Delivery is at-least-once and may
    /// coalesce rapid transitions. `None` when the oracle only answers polls.
    fn subscribe(&self) -> Option<broadcast::Receiver<IdleState>>;
}

/// Queries the oracle, degrading to `Idle` when it cannot answer so that an
/// outage under-counts activity instead of inventing it.
pub async fn observe(oracle: &dyn IdleOracle, threshold_secs: u32) -> IdleState {
    match oracle.query_state(threshold_secs).await {
        Ok(state) => state,
        Err(err) => {
            warn!("Idle oracle query failed, assuming idle for this tick: {err}");
            IdleState::Idle
        }
    }
}
