use std::sync::Arc;

use chrono::Duration;
use shared::{QuantityDelta, StockKey};

use crate::error::Result;
use crate::journal::JournalWriter;
use crate::lock::MutexLock;
use crate::low_stock::{LowStockFinder, LowStockItem, LowStockMode};
use crate::merge::{CompactionOutcome, MergeCoordinator};
use crate::models::InventoryCounter;
use crate::scheduler::{CompactionConfig, CompactionScheduler};
use crate::storage::{AppendOutcome, EntryId, StorageEngine};
use crate::view::{EffectivePosition, InventoryView};

/// The counter contract offered to order and allocation services.
#[derive(Clone)]
pub struct InventoryService {
    storage: Arc<dyn StorageEngine>,
    journal: JournalWriter,
    view: InventoryView,
    coordinator: MergeCoordinator,
    low_stock: LowStockFinder,
}

impl InventoryService {
    /// Fails with [`InventoryError::InvalidConfig`](crate::error::InventoryError::InvalidConfig)
    /// for a non-positive lease or a batch limit below one.
    pub fn new(storage: Arc<dyn StorageEngine>, lease_ttl: Duration, batch_limit: Option<i64>) -> Result<Self> {
        let lock = MutexLock::new(storage.clone(), lease_ttl)?;
        Ok(Self {
            journal: JournalWriter::new(storage.clone()),
            view: InventoryView::new(storage.clone()),
            coordinator: MergeCoordinator::new(storage.clone(), lock, batch_limit)?,
            low_stock: LowStockFinder::new(storage.clone()),
            storage,
        })
    }

    pub async fn append_delta(&self, key: &StockKey, delta: QuantityDelta) -> Result<EntryId> {
        self.journal.append_delta(key, delta).await
    }

    pub async fn append_delta_once(
        &self,
        idempotency_key: &str,
        key: &StockKey,
        delta: QuantityDelta,
    ) -> Result<AppendOutcome> {
        self.journal.append_delta_once(idempotency_key, key, delta).await
    }

    pub async fn get_effective_quantity(&self, key: &StockKey) -> Result<i64> {
        self.view.effective_quantity(key).await
    }

    pub async fn get_effective_position(&self, key: &StockKey) -> Result<EffectivePosition> {
        self.view.effective_position(key).await
    }

    pub async fn trigger_compaction(&self, key: &StockKey) -> Result<CompactionOutcome> {
        self.coordinator.merge_and_compact(key).await
    }

    pub async fn find_low_stock(&self, threshold: i64, mode: LowStockMode) -> Result<Vec<LowStockItem>> {
        self.low_stock.find_low_stock(threshold, mode).await
    }

    pub async fn find_below_reorder_minimum(&self) -> Result<Vec<LowStockItem>> {
        self.low_stock.find_below_reorder_minimum().await
    }

    /// Creates the base counter if the key has none. Existing counters are left untouched.
    pub async fn register_counter(&self, key: &StockKey, quantity_on_hand: i64, reorder_minimum: i64) -> Result<bool> {
        self.storage
            .register_counter(&InventoryCounter::new(key, quantity_on_hand, reorder_minimum))
            .await
    }

    pub fn scheduler(&self, config: CompactionConfig) -> CompactionScheduler {
        CompactionScheduler::new(self.storage.clone(), self.coordinator.clone(), config)
    }
}
