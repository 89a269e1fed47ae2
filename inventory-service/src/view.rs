use std::sync::Arc;

use serde::Serialize;
use shared::StockKey;
use tracing::error;

use crate::error::{InventoryError, Result};
use crate::storage::{StockSnapshot, StorageEngine};

/// Base counter plus every unconsumed delta for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectivePosition {
    pub key: StockKey,
    pub quantity_on_hand: i64,
    pub allocated_quantity: i64,
    pub available_quantity: i64,
    pub reorder_minimum: i64,
    pub pending_entries: i64,
}

/// Exact point reads, independent of when compaction last ran.
#[derive(Clone)]
pub struct InventoryView {
    storage: Arc<dyn StorageEngine>,
}

impl InventoryView {
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self { storage }
    }

    /// Quantity on hand only; the allocated side is never summed here.
    pub async fn effective_quantity(&self, key: &StockKey) -> Result<i64> {
        let snapshot = self.storage.snapshot(key).await?;
        let (base_qoh, _, _) = base_of(key, &snapshot)?;

        base_qoh
            .checked_add(snapshot.pending.quantity_on_hand)
            .ok_or_else(|| InventoryError::overflow(key, "effective quantity on hand"))
    }

    pub async fn effective_position(&self, key: &StockKey) -> Result<EffectivePosition> {
        let snapshot = self.storage.snapshot(key).await?;
        let (base_qoh, base_alloc, reorder_minimum) = base_of(key, &snapshot)?;

        let quantity_on_hand = base_qoh
            .checked_add(snapshot.pending.quantity_on_hand)
            .ok_or_else(|| InventoryError::overflow(key, "effective quantity on hand"))?;
        let allocated_quantity = base_alloc
            .checked_add(snapshot.pending.allocated_quantity)
            .ok_or_else(|| InventoryError::overflow(key, "effective allocated quantity"))?;
        let available_quantity = quantity_on_hand
            .checked_sub(allocated_quantity)
            .ok_or_else(|| InventoryError::overflow(key, "available quantity"))?;

        Ok(EffectivePosition {
            key: key.clone(),
            quantity_on_hand,
            allocated_quantity,
            available_quantity,
            reorder_minimum,
            pending_entries: snapshot.pending_entries,
        })
    }
}

/// Quantity on hand, allocated quantity and reorder minimum of the single base row.
fn base_of(key: &StockKey, snapshot: &StockSnapshot) -> Result<(i64, i64, i64)> {
    if snapshot.counters.len() > 1 {
        error!("Found {} base counter rows for {}", snapshot.counters.len(), key);
        return Err(InventoryError::DataIntegrity(format!(
            "{} base counter rows for {}",
            snapshot.counters.len(),
            key
        )));
    }

    // A key that has never been merged has an implicit zero base.
    Ok(snapshot
        .counters
        .first()
        .map(|c| (c.quantity_on_hand, c.allocated_quantity, c.reorder_minimum))
        .unwrap_or_default())
}
