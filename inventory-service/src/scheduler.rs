use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::time;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::merge::{CompactionOutcome, MergeCoordinator};
use crate::storage::StorageEngine;

#[derive(Debug, Clone)]
pub struct CompactionConfig {
    pub interval: Duration,
    /// Keys with fewer unconsumed entries are left for a later round.
    pub trigger_min_entries: i64,
    pub workers: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            trigger_min_entries: 1,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundStats {
    pub merged: usize,
    pub empty: usize,
    pub busy: usize,
    pub failed: usize,
}

/// Background compaction. Each tick merges every key over the trigger
/// threshold, several keys at a time.
pub struct CompactionScheduler {
    storage: Arc<dyn StorageEngine>,
    coordinator: MergeCoordinator,
    config: CompactionConfig,
}

impl CompactionScheduler {
    pub fn new(storage: Arc<dyn StorageEngine>, coordinator: MergeCoordinator, config: CompactionConfig) -> Self {
        Self { storage, coordinator, config }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.config.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.run_round().await {
                error!("Error selecting keys for compaction: {}", e);
            }
        }
    }

    pub async fn run_round(&self) -> Result<RoundStats> {
        let keys = self.storage.pending_keys(self.config.trigger_min_entries).await?;
        if keys.is_empty() {
            return Ok(RoundStats::default());
        }
        debug!("Compaction round over {} keys", keys.len());

        let outcomes = stream::iter(keys)
            .map(|(key, pending)| async move {
                let outcome = self.coordinator.merge_and_compact(&key).await;
                if let Err(e) = &outcome {
                    error!("Compaction of {} ({} pending entries) failed: {}", key, pending, e);
                }
                outcome
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut stats = RoundStats::default();
        for outcome in outcomes {
            match outcome {
                Ok(CompactionOutcome::Merged(_)) => stats.merged += 1,
                Ok(CompactionOutcome::NothingToMerge) => stats.empty += 1,
                Ok(CompactionOutcome::Busy) => stats.busy += 1,
                Err(_) => stats.failed += 1,
            }
        }

        if stats.merged > 0 || stats.failed > 0 {
            info!(
                "Compaction round: {} merged, {} busy, {} empty, {} failed",
                stats.merged, stats.busy, stats.empty, stats.failed
            );
        }
        Ok(stats)
    }
}
