//! Fleet-wide low-stock reporting.
//!
//! Exact sums are cheap per key but expensive across every key, so the
//! default [`LowStockMode::Eventual`] reads base counters only. Its answer is
//! stale by whatever has been journaled since each key was last compacted.
//! [`LowStockMode::Exact`] pays one effective read per counter instead.
//! Keys that have journal entries but have never been compacted or
//! registered have no counter row and are not reported by either mode.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::models::InventoryCounter;
use crate::storage::StorageEngine;
use crate::view::InventoryView;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LowStockMode {
    #[default]
    Eventual,
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStockItem {
    pub sku_code: String,
    pub warehouse_id: i32,
    pub quantity_on_hand: i64,
    pub reorder_minimum: i64,
}

impl LowStockItem {
    fn from_counter(counter: InventoryCounter, quantity_on_hand: i64) -> Self {
        Self {
            sku_code: counter.sku_code,
            warehouse_id: counter.warehouse_id,
            quantity_on_hand,
            reorder_minimum: counter.reorder_minimum,
        }
    }
}

#[derive(Clone)]
pub struct LowStockFinder {
    storage: Arc<dyn StorageEngine>,
    view: InventoryView,
}

impl LowStockFinder {
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self {
            view: InventoryView::new(storage.clone()),
            storage,
        }
    }

    /// Keys whose quantity on hand is below `threshold`.
    pub async fn find_low_stock(&self, threshold: i64, mode: LowStockMode) -> Result<Vec<LowStockItem>> {
        let items = match mode {
            LowStockMode::Eventual => self
                .storage
                .scan_counters(Some(threshold))
                .await?
                .into_iter()
                .map(|c| {
                    let qoh = c.quantity_on_hand;
                    LowStockItem::from_counter(c, qoh)
                })
                .collect(),
            LowStockMode::Exact => {
                let counters = self.storage.scan_counters(None).await?;
                debug!("Exact low-stock scan over {} counters", counters.len());
                let mut items = Vec::new();
                for counter in counters {
                    let qoh = self.view.effective_quantity(&counter.key()).await?;
                    if qoh < threshold {
                        items.push(LowStockItem::from_counter(counter, qoh));
                    }
                }
                items
            }
        };
        Ok(items)
    }

    /// Counters whose base quantity on hand is under their own reorder minimum.
    pub async fn find_below_reorder_minimum(&self) -> Result<Vec<LowStockItem>> {
        Ok(self
            .storage
            .scan_counters(None)
            .await?
            .into_iter()
            .filter(|c| c.quantity_on_hand < c.reorder_minimum)
            .map(|c| {
                let qoh = c.quantity_on_hand;
                LowStockItem::from_counter(c, qoh)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use shared::{QuantityDelta, StockKey};

    async fn seeded() -> (Arc<MemoryStorage>, LowStockFinder) {
        let storage = Arc::new(MemoryStorage::new());
        for (sku, qoh, min) in [("A", 3, 5), ("B", 50, 5), ("C", 8, 10)] {
            storage
                .register_counter(&InventoryCounter::new(&StockKey::new(sku, 1), qoh, min))
                .await
                .unwrap();
        }
        // B is about to run out, but nothing has been compacted yet.
        storage.insert_entry(&StockKey::new("B", 1), QuantityDelta::new(-48, 0)).await.unwrap();
        let finder = LowStockFinder::new(storage.clone());
        (storage, finder)
    }

    fn skus(items: &[LowStockItem]) -> Vec<&str> {
        items.iter().map(|i| i.sku_code.as_str()).collect()
    }

    #[tokio::test]
    async fn eventual_mode_reads_base_counters_only() {
        let (_, finder) = seeded().await;
        let items = finder.find_low_stock(10, LowStockMode::Eventual).await.unwrap();
        assert_eq!(skus(&items), vec!["A", "C"]);
    }

    #[tokio::test]
    async fn exact_mode_includes_unmerged_deltas() {
        let (_, finder) = seeded().await;
        let items = finder.find_low_stock(10, LowStockMode::Exact).await.unwrap();
        assert_eq!(skus(&items), vec!["A", "B", "C"]);
        assert_eq!(items[1].quantity_on_hand, 2);
    }

    #[tokio::test]
    async fn reorder_report_uses_each_counters_minimum() {
        let (_, finder) = seeded().await;
        let items = finder.find_below_reorder_minimum().await.unwrap();
        assert_eq!(skus(&items), vec!["A", "C"]);
    }
}
