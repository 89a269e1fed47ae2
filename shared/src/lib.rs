use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;

/// Identifies one inventory counter: a SKU stocked in a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub sku_code: String,
    pub warehouse_id: i32,
}

impl StockKey {
    pub fn new(sku_code: impl Into<String>, warehouse_id: i32) -> Self {
        Self {
            sku_code: sku_code.into(),
            warehouse_id,
        }
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.sku_code, self.warehouse_id)
    }
}

/// A signed change to both counters of a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityDelta {
    pub quantity_on_hand: i64,
    pub allocated_quantity: i64,
}

impl QuantityDelta {
    pub fn new(quantity_on_hand: i64, allocated_quantity: i64) -> Self {
        Self { quantity_on_hand, allocated_quantity }
    }

    pub fn is_zero(&self) -> bool {
        self.quantity_on_hand == 0 && self.allocated_quantity == 0
    }

    /// Returns `None` if either component overflows `i64`.
    pub fn checked_add(self, other: QuantityDelta) -> Option<QuantityDelta> {
        Some(Self {
            quantity_on_hand: self.quantity_on_hand.checked_add(other.quantity_on_hand)?,
            allocated_quantity: self.allocated_quantity.checked_add(other.allocated_quantity)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEventKind {
    Receipt,
    Return,
    Reserve,
    ReleaseReservation,
    Ship,
    Adjustment {
        quantity_on_hand_delta: i64,
        allocated_quantity_delta: i64,
    },
}

/// A business event that moves stock, as published by the order pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockEvent {
    pub id: Uuid,
    pub idempotency_key: String,
    pub sku_code: String,
    pub warehouse_id: i32,
    pub kind: StockEventKind,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

impl StockEvent {
    pub fn new(key: &StockKey, kind: StockEventKind, quantity: i64) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            idempotency_key: id.to_string(),
            sku_code: key.sku_code.clone(),
            warehouse_id: key.warehouse_id,
            kind,
            quantity,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.sku_code.clone(), self.warehouse_id)
    }

    /// The counter change this event stands for. `quantity` is ignored for adjustments.
    pub fn delta(&self) -> Option<QuantityDelta> {
        let q = self.quantity;
        let delta = match &self.kind {
            StockEventKind::Receipt | StockEventKind::Return => QuantityDelta::new(q, 0),
            StockEventKind::Reserve => QuantityDelta::new(0, q),
            StockEventKind::ReleaseReservation => QuantityDelta::new(0, q.checked_neg()?),
            StockEventKind::Ship => {
                let neg = q.checked_neg()?;
                QuantityDelta::new(neg, neg)
            }
            StockEventKind::Adjustment {
                quantity_on_hand_delta,
                allocated_quantity_delta,
            } => QuantityDelta::new(*quantity_on_hand_delta, *allocated_quantity_delta),
        };
        Some(delta)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    Appended,
    Duplicate,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockEventReply {
    pub id: Uuid,
    pub event_id: Uuid,
    pub status: ReplyStatus,
    pub entry_id: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StockEventReply {
    pub fn appended(event_id: Uuid, entry_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            status: ReplyStatus::Appended,
            entry_id: Some(entry_id),
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn duplicate(event_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            status: ReplyStatus::Duplicate,
            entry_id: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(event_id: Uuid, error: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            status: ReplyStatus::Failed,
            entry_id: None,
            error: Some(error),
            created_at: Utc::now(),
        }
    }
}
