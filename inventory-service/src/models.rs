use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, Utc};
use shared::{QuantityDelta, StockKey};

/// The base row. Only ever changed by adding a rollup inside a merge transaction.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::inventory_counters)]
pub struct InventoryCounter {
    pub sku_code: String,
    pub warehouse_id: i32,
    pub quantity_on_hand: i64,
    pub allocated_quantity: i64,
    pub reorder_minimum: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl InventoryCounter {
    pub fn new(key: &StockKey, quantity_on_hand: i64, reorder_minimum: i64) -> Self {
        Self {
            sku_code: key.sku_code.clone(),
            warehouse_id: key.warehouse_id,
            quantity_on_hand,
            allocated_quantity: 0,
            reorder_minimum,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.sku_code.clone(), self.warehouse_id)
    }

    /// Adds `delta` to both counters, or `None` on overflow.
    pub fn with_delta(&self, delta: QuantityDelta) -> Option<Self> {
        Some(Self {
            quantity_on_hand: self.quantity_on_hand.checked_add(delta.quantity_on_hand)?,
            allocated_quantity: self.allocated_quantity.checked_add(delta.allocated_quantity)?,
            updated_at: Some(Utc::now()),
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::inventory_journal)]
pub struct JournalEntry {
    pub id: i64,
    pub sku_code: String,
    pub warehouse_id: i32,
    pub quantity_on_hand_delta: i64,
    pub allocated_quantity_delta: i64,
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.sku_code.clone(), self.warehouse_id)
    }

    pub fn delta(&self) -> QuantityDelta {
        QuantityDelta::new(self.quantity_on_hand_delta, self.allocated_quantity_delta)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::inventory_journal)]
pub struct NewJournalEntry {
    pub sku_code: String,
    pub warehouse_id: i32,
    pub quantity_on_hand_delta: i64,
    pub allocated_quantity_delta: i64,
    pub created_at: DateTime<Utc>,
}

impl NewJournalEntry {
    pub fn new(key: &StockKey, delta: QuantityDelta) -> Self {
        Self {
            sku_code: key.sku_code.clone(),
            warehouse_id: key.warehouse_id,
            quantity_on_hand_delta: delta.quantity_on_hand,
            allocated_quantity_delta: delta.allocated_quantity,
            created_at: Utc::now(),
        }
    }
}

/// Presence of the row means a compaction for the key is in progress.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::compaction_locks)]
pub struct LockRecord {
    pub sku_code: String,
    pub warehouse_id: i32,
    pub holder: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn new(key: &StockKey, holder: Uuid, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sku_code: key.sku_code.clone(),
            warehouse_id: key.warehouse_id,
            holder,
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.sku_code.clone(), self.warehouse_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::processed_events)]
pub struct ProcessedEvent {
    pub idempotency_key: String,
    pub entry_id: i64,
    pub processed_at: Option<DateTime<Utc>>,
}
