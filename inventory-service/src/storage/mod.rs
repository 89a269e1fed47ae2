//! The storage engine contract the journal and compaction engine runs on.
//!
//! Everything above this trait is storage-agnostic. Implementations must
//! honour three guarantees: journal inserts are independent row inserts,
//! lock inserts are conditional on key uniqueness, and
//! [`StorageEngine::apply_rollup`] is all-or-nothing.

mod memory;
mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

use async_trait::async_trait;
use shared::{QuantityDelta, StockKey};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{InventoryCounter, JournalEntry, LockRecord};
use crate::rollup::Rollup;

pub type EntryId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(EntryId),
    /// The idempotency key was already consumed; nothing was written.
    Duplicate,
}

/// Base counter rows and the sum of unconsumed deltas for one key, read from
/// a single consistent view of storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockSnapshot {
    pub counters: Vec<InventoryCounter>,
    pub pending: QuantityDelta,
    pub pending_entries: i64,
}

#[async_trait]
pub trait StorageEngine: Send + Sync + 'static {
    async fn insert_entry(&self, key: &StockKey, delta: QuantityDelta) -> Result<EntryId>;

    /// Records `idempotency_key` and the journal row in one transaction.
    async fn insert_entry_once(
        &self,
        idempotency_key: &str,
        key: &StockKey,
        delta: QuantityDelta,
    ) -> Result<AppendOutcome>;

    /// Unconsumed entries for `key` in id order, at most `limit` of them.
    async fn load_entries(&self, key: &StockKey, limit: Option<i64>) -> Result<Vec<JournalEntry>>;

    /// Keys with at least `min_entries` unconsumed entries, with their counts.
    async fn pending_keys(&self, min_entries: i64) -> Result<Vec<(StockKey, i64)>>;

    async fn snapshot(&self, key: &StockKey) -> Result<StockSnapshot>;

    /// Base counters, optionally only those with `quantity_on_hand < below`.
    async fn scan_counters(&self, below: Option<i64>) -> Result<Vec<InventoryCounter>>;

    /// Inserts the counter unless one already exists. Returns whether it was created.
    async fn register_counter(&self, counter: &InventoryCounter) -> Result<bool>;

    /// Conditional insert. `false` means another holder has the key.
    async fn try_insert_lock(&self, lock: &LockRecord) -> Result<bool>;

    /// Replaces the lock row for `lock`'s key only if the existing lease has
    /// expired by the engine's own clock, never the caller's.
    async fn reclaim_expired_lock(&self, lock: &LockRecord) -> Result<bool>;

    /// Deletes the lock row if it is still owned by `holder`. Safe to repeat.
    async fn delete_lock(&self, key: &StockKey, holder: Uuid) -> Result<()>;

    /// In one transaction: verify `holder` still owns the lock, delete exactly
    /// `rollup.ids`, and add the rollup totals to the base counter.
    async fn apply_rollup(&self, rollup: &Rollup, holder: Uuid) -> Result<InventoryCounter>;
}
