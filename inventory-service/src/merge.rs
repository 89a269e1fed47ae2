use std::sync::Arc;

use serde::Serialize;
use shared::{QuantityDelta, StockKey};
use tracing::{debug, error, info, warn};

use crate::error::{InventoryError, Result};
use crate::lock::{LockAttempt, LockLease, MutexLock};
use crate::models::InventoryCounter;
use crate::rollup::{Rollup, RollupCalculator};
use crate::storage::StorageEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub key: StockKey,
    pub merged_entries: usize,
    pub delta: QuantityDelta,
    pub counter: InventoryCounter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    Merged(MergeSummary),
    NothingToMerge,
    /// Another worker holds the key. Expected under concurrent schedulers; try next tick.
    Busy,
}

/// Folds a key's journal into its base counter under the per-key lock.
#[derive(Clone)]
pub struct MergeCoordinator {
    storage: Arc<dyn StorageEngine>,
    lock: MutexLock,
    rollups: RollupCalculator,
    batch_limit: Option<i64>,
}

impl MergeCoordinator {
    /// A batch limit below one would leave every rollup empty while entries
    /// are still pending.
    pub fn new(storage: Arc<dyn StorageEngine>, lock: MutexLock, batch_limit: Option<i64>) -> Result<Self> {
        if let Some(limit) = batch_limit.filter(|l| *l < 1) {
            return Err(InventoryError::InvalidConfig(format!(
                "compaction batch limit must be at least 1, got {}",
                limit
            )));
        }
        Ok(Self {
            rollups: RollupCalculator::new(storage.clone()),
            storage,
            lock,
            batch_limit,
        })
    }

    pub async fn merge_and_compact(&self, key: &StockKey) -> Result<CompactionOutcome> {
        let lease = match self.lock.acquire(key).await? {
            LockAttempt::Acquired(lease) => lease,
            LockAttempt::Busy => {
                debug!("Compaction of {} skipped, lock is busy", key);
                return Ok(CompactionOutcome::Busy);
            }
        };

        let rollup = match self.compute_rollup(key).await {
            Ok(rollup) => rollup,
            Err(e) => {
                // Nothing was written yet, so the lock can go straight back.
                self.release_quietly(&lease).await;
                return Err(e);
            }
        };

        if rollup.is_empty() {
            self.lock.release(&lease).await?;
            return Ok(CompactionOutcome::NothingToMerge);
        }

        // On failure the lock stays until its lease expires.
        let counter = match self.storage.apply_rollup(&rollup, lease.holder).await {
            Ok(counter) => counter,
            Err(e) => {
                match &e {
                    InventoryError::DataIntegrity(msg) => {
                        error!("Merge of {} aborted on integrity violation: {}", key, msg)
                    }
                    InventoryError::LockLost { .. } => {
                        warn!("Merge of {} aborted, lease was reclaimed by another worker", key)
                    }
                    other => error!("Merge of {} failed: {}", key, other),
                }
                return Err(e);
            }
        };

        self.release_quietly(&lease).await;

        info!(
            "Merged {} journal entries into {} (qoh {:+}, allocated {:+}); base is now {}/{}",
            rollup.len(),
            key,
            rollup.quantity_on_hand_delta(),
            rollup.allocated_quantity_delta(),
            counter.quantity_on_hand,
            counter.allocated_quantity
        );

        Ok(CompactionOutcome::Merged(MergeSummary {
            key: key.clone(),
            merged_entries: rollup.len(),
            delta: rollup.delta,
            counter,
        }))
    }

    async fn compute_rollup(&self, key: &StockKey) -> Result<Rollup> {
        match self.batch_limit {
            Some(limit) => self.rollups.compute_rollup_capped(key, limit).await,
            None => self.rollups.compute_rollup(key).await,
        }
    }

    async fn release_quietly(&self, lease: &LockLease) {
        if let Err(e) = self.lock.release(lease).await {
            warn!(
                "Failed to release compaction lock for {}, it expires at {}: {}",
                lease.key, lease.expires_at, e
            );
        }
    }
}
