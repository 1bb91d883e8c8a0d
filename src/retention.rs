use std::sync::Arc;

use log::info;

use crate::{error::Result, models::EpochRecord, store::EpochStore};

pub const DAY_MS: i64 = 86_400_000;

/// Deletes epochs older than the retention horizon.
#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn EpochStore>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn EpochStore>) -> Self {
        Self { store }
    }

    /// Removes every record with `timestamp < now - retention_days` and returns
    /// how many went. `retention_days <= 0` keeps everything.
    pub async fn sweep(&self, retention_days: i32, now_ms: i64) -> Result<usize> {
        if retention_days <= 0 {
            return Ok(0);
        }
        let cutoff = now_ms.saturating_sub(i64::from(retention_days).saturating_mul(DAY_MS));
        let removed = self
            .store
            .delete_where(Box::new(move |record: &EpochRecord| record.timestamp < cutoff))
            .await?;
        info!("Cleaned up {removed} epochs older than {retention_days} days");
        Ok(removed)
    }
}
