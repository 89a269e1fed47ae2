use std::sync::Arc;

use shared::{QuantityDelta, StockKey};

use crate::error::{InventoryError, Result};
use crate::models::JournalEntry;
use crate::storage::{EntryId, StorageEngine};

/// Summed snapshot of unconsumed journal entries for one key, plus the exact
/// ids it summarizes. Meaningless once any of those ids has been deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollup {
    pub key: StockKey,
    pub delta: QuantityDelta,
    pub ids: Vec<EntryId>,
}

impl Rollup {
    pub fn empty(key: StockKey) -> Self {
        Self {
            key,
            delta: QuantityDelta::default(),
            ids: Vec::new(),
        }
    }

    pub fn from_entries(key: &StockKey, entries: &[JournalEntry]) -> Result<Self> {
        let mut rollup = Self::empty(key.clone());
        for entry in entries {
            if entry.key() != *key {
                return Err(InventoryError::DataIntegrity(format!(
                    "journal entry {} belongs to {}, not {}",
                    entry.id,
                    entry.key(),
                    key
                )));
            }
            rollup.delta = rollup
                .delta
                .checked_add(entry.delta())
                .ok_or_else(|| InventoryError::overflow(key, "rollup sum"))?;
            rollup.ids.push(entry.id);
        }
        Ok(rollup)
    }

    pub fn quantity_on_hand_delta(&self) -> i64 {
        self.delta.quantity_on_hand
    }

    pub fn allocated_quantity_delta(&self) -> i64 {
        self.delta.allocated_quantity
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Read-only; safe to run from any number of processes at once.
#[derive(Clone)]
pub struct RollupCalculator {
    storage: Arc<dyn StorageEngine>,
}

impl RollupCalculator {
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self { storage }
    }

    pub async fn compute_rollup(&self, key: &StockKey) -> Result<Rollup> {
        let entries = self.storage.load_entries(key, None).await?;
        Rollup::from_entries(key, &entries)
    }

    /// Sums at most `limit` of the oldest entries so one hot key cannot make a
    /// compaction round unbounded.
    pub async fn compute_rollup_capped(&self, key: &StockKey, limit: i64) -> Result<Rollup> {
        if limit < 1 {
            return Err(InventoryError::InvalidConfig(format!(
                "rollup batch limit must be at least 1, got {}",
                limit
            )));
        }
        let entries = self.storage.load_entries(key, Some(limit)).await?;
        Rollup::from_entries(key, &entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(id: EntryId, sku: &str, qoh: i64, alloc: i64) -> JournalEntry {
        JournalEntry {
            id,
            sku_code: sku.to_string(),
            warehouse_id: 1,
            quantity_on_hand_delta: qoh,
            allocated_quantity_delta: alloc,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn sums_deltas_and_keeps_ids_in_order() {
        let key = StockKey::new("A", 1);
        let rollup = Rollup::from_entries(
            &key,
            &[entry(3, "A", -5, 1), entry(7, "A", -3, 0), entry(9, "A", -2, -1)],
        )
        .unwrap();

        assert_eq!(rollup.quantity_on_hand_delta(), -10);
        assert_eq!(rollup.allocated_quantity_delta(), 0);
        assert_eq!(rollup.ids, vec![3, 7, 9]);
    }

    #[test]
    fn foreign_entry_is_an_integrity_error() {
        let key = StockKey::new("A", 1);
        let err = Rollup::from_entries(&key, &[entry(1, "B", 1, 0)]).unwrap_err();
        assert!(matches!(err, InventoryError::DataIntegrity(_)));
    }

    #[test]
    fn overflowing_sum_is_rejected() {
        let key = StockKey::new("A", 1);
        let err = Rollup::from_entries(&key, &[entry(1, "A", i64::MAX, 0), entry(2, "A", 1, 0)])
            .unwrap_err();
        assert!(matches!(err, InventoryError::QuantityOverflow { .. }));
    }

    #[test]
    fn no_entries_is_empty() {
        let rollup = Rollup::from_entries(&StockKey::new("A", 1), &[]).unwrap();
        assert!(rollup.is_empty());
        assert!(rollup.delta.is_zero());
    }

    #[tokio::test]
    async fn capped_rollup_rejects_limits_below_one() {
        let storage = Arc::new(crate::storage::MemoryStorage::new());
        let key = StockKey::new("A", 1);
        storage.insert_entry(&key, QuantityDelta::new(-1, 0)).await.unwrap();
        let rollups = RollupCalculator::new(storage);

        for limit in [0, -5] {
            let err = rollups.compute_rollup_capped(&key, limit).await.unwrap_err();
            assert!(matches!(err, InventoryError::InvalidConfig(_)));
        }
        assert_eq!(rollups.compute_rollup_capped(&key, 1).await.unwrap().len(), 1);
    }
}
