//! Error taxonomy shared by the engine, the merge engine and the stores.
//!
//! Tick-driven work (heartbeats, idle notifications, cleanup alarms) logs these
//! and carries on; user-initiated operations hand them back to the caller.

use thiserror::Error;

pub type Result<T, E = ActigramError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ActigramError {
    /// A durable store could not be read or written. Transient: the caller keeps
    /// its in-memory state and retries on the next tick.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A record or setting that must never be persisted.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Malformed import payload. The whole import is rejected.
    #[error("import format error: {0}")]
    ImportFormat(String),

    /// The idle oracle could not answer. Callers degrade to `IdleState::Idle`.
    #[error("idle oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// The engine task is gone. Permanent: retrying the same handle cannot succeed.
    #[error("engine stopped: {0}")]
    EngineStopped(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ActigramError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        ActigramError::StoreUnavailable(err.to_string())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ActigramError::InvalidRecord(message.into())
    }

    pub fn import(message: impl Into<String>) -> Self {
        ActigramError::ImportFormat(message.into())
    }

    /// Whether retrying on a later tick can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ActigramError::StoreUnavailable(_) | ActigramError::OracleUnavailable(_)
        )
    }
}

impl From<anyhow::Error> for ActigramError {
    fn from(err: anyhow::Error) -> Self {
        ActigramError::StoreUnavailable(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_errors_become_store_unavailable() {
        let err: ActigramError = anyhow::anyhow!("disk full").context("failed to put epoch").into();
        match err {
            ActigramError::StoreUnavailable(message) => {
                assert!(message.contains("failed to put epoch"));
                assert!(message.contains("disk full"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn only_store_and_oracle_failures_are_transient() {
        assert!(ActigramError::store("locked").is_transient());
        assert!(ActigramError::OracleUnavailable("gone".into()).is_transient());
        assert!(!ActigramError::invalid("no timestamp").is_transient());
        assert!(!ActigramError::import("bad json").is_transient());
        assert!(!ActigramError::EngineStopped("gone".into()).is_transient());
    }
}
