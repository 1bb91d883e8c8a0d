//! Durable store seams used by the engines.
//!
//! [`ConfigStore`] holds small JSON values (settings, the tracking-state and
//! current-epoch snapshots). [`EpochStore`] holds finalized epoch records keyed
//! by start timestamp and always yields them in ascending timestamp order.

mod config_file;

pub use config_file::FileConfigStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::EpochRecord;

pub const SETTINGS_KEY: &str = "settings";
pub const TRACKING_STATE_KEY: &str = "trackingState";
pub const CURRENT_EPOCH_KEY: &str = "currentEpoch";

pub type EpochPredicate = Box<dyn Fn(&EpochRecord) -> bool + Send + 'static>;

/// Read-modify-write step for one key. Returning `None` deletes the record.
pub type RecordUpdate =
    Box<dyn FnOnce(Option<EpochRecord>) -> Result<Option<EpochRecord>> + Send + 'static>;

/// Whole-set rewrite. Receives every record in timestamp order and returns the
/// complete replacement set.
pub type RecordRewrite =
    Box<dyn FnOnce(Vec<EpochRecord>) -> Result<Vec<EpochRecord>> + Send + 'static>;

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

#[async_trait]
pub trait EpochStore: Send + Sync {
    async fn get(&self, timestamp: i64) -> Result<Option<EpochRecord>>;

    /// Inserts or overwrites the record at `record.timestamp`.
    async fn put(&self, record: EpochRecord) -> Result<()>;

    /// Records with `start <= timestamp <= end`, ascending.
    async fn get_range(&self, start: Option<i64>, end: Option<i64>) -> Result<Vec<EpochRecord>>;

    async fn delete_where(&self, predicate: EpochPredicate) -> Result<usize>;

    async fn clear(&self) -> Result<()>;

    /// Applies `update` to the record at `timestamp` atomically with respect to
    /// every other store operation. Returns the stored result.
    async fn update(&self, timestamp: i64, update: RecordUpdate) -> Result<Option<EpochRecord>>;

    /// Replaces the whole record set in one transaction. Returns the new count.
    async fn rewrite(&self, rewrite: RecordRewrite) -> Result<usize>;
}
