use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use shared::StockKey;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{InventoryError, Result};
use crate::models::LockRecord;
use crate::storage::StorageEngine;

/// Proof of holding the compaction lock for a key until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: StockKey,
    pub holder: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired(LockLease),
    Busy,
}

/// Per-key try-lock backed by a uniquely keyed row. A holder that crashes
/// leaves its row behind; once the lease runs out the next acquirer takes it over.
#[derive(Clone)]
pub struct MutexLock {
    storage: Arc<dyn StorageEngine>,
    ttl: Duration,
}

impl MutexLock {
    /// A lease must be positive, or every acquirer would find the current
    /// holder already expired and take the lock over.
    pub fn new(storage: Arc<dyn StorageEngine>, ttl: Duration) -> Result<Self> {
        if ttl <= Duration::zero() {
            return Err(InventoryError::InvalidConfig(format!(
                "compaction lease must be positive, got {}s",
                ttl.num_seconds()
            )));
        }
        Ok(Self { storage, ttl })
    }

    /// Never waits. A live lease held elsewhere yields [`LockAttempt::Busy`].
    pub async fn acquire(&self, key: &StockKey) -> Result<LockAttempt> {
        let record = LockRecord::new(key, Uuid::new_v4(), self.ttl);
        let lease = LockLease {
            key: key.clone(),
            holder: record.holder,
            expires_at: record.expires_at,
        };

        if self.storage.try_insert_lock(&record).await? {
            debug!("Acquired compaction lock for {} as {}", key, lease.holder);
            return Ok(LockAttempt::Acquired(lease));
        }

        if self.storage.reclaim_expired_lock(&record).await? {
            warn!("Reclaimed expired compaction lock for {}", key);
            return Ok(LockAttempt::Acquired(lease));
        }

        Ok(LockAttempt::Busy)
    }

    /// Idempotent. Does nothing if the lease was already released or reclaimed.
    pub async fn release(&self, lease: &LockLease) -> Result<()> {
        self.storage.delete_lock(&lease.key, lease.holder).await?;
        debug!("Released compaction lock for {}", lease.key);
        Ok(())
    }
}
