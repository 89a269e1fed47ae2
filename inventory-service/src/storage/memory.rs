use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use shared::{QuantityDelta, StockKey};
use uuid::Uuid;

use super::{AppendOutcome, EntryId, StockSnapshot, StorageEngine};
use crate::error::{InventoryError, Result};
use crate::models::{InventoryCounter, JournalEntry, LockRecord, NewJournalEntry};
use crate::rollup::Rollup;

#[derive(Default)]
struct State {
    next_id: EntryId,
    counters: BTreeMap<StockKey, InventoryCounter>,
    journal: BTreeMap<EntryId, JournalEntry>,
    locks: HashMap<StockKey, LockRecord>,
    processed: HashMap<String, EntryId>,
}

impl State {
    fn append(&mut self, key: &StockKey, delta: QuantityDelta) -> EntryId {
        self.next_id += 1;
        let id = self.next_id;
        let new = NewJournalEntry::new(key, delta);
        self.journal.insert(
            id,
            JournalEntry {
                id,
                sku_code: new.sku_code,
                warehouse_id: new.warehouse_id,
                quantity_on_hand_delta: new.quantity_on_hand_delta,
                allocated_quantity_delta: new.allocated_quantity_delta,
                created_at: new.created_at,
            },
        );
        id
    }

    fn entries_for<'a>(&'a self, key: &'a StockKey) -> impl Iterator<Item = &'a JournalEntry> + 'a {
        self.journal
            .values()
            .filter(move |e| e.warehouse_id == key.warehouse_id && e.sku_code == key.sku_code)
    }
}

/// In-process storage engine. Every operation runs under one mutex, which
/// makes each call trivially atomic.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, key: &StockKey) -> Option<InventoryCounter> {
        self.state.lock().counters.get(key).cloned()
    }

    pub fn journal_ids(&self, key: &StockKey) -> Vec<EntryId> {
        let state = self.state.lock();
        state.entries_for(key).map(|e| e.id).collect()
    }

    pub fn lock_record(&self, key: &StockKey) -> Option<LockRecord> {
        self.state.lock().locks.get(key).cloned()
    }

    /// Plants a lock row as if a worker had crashed while holding it.
    pub fn insert_lock_record(&self, lock: LockRecord) {
        self.state.lock().locks.insert(lock.key(), lock);
    }
}

#[async_trait]
impl StorageEngine for MemoryStorage {
    async fn insert_entry(&self, key: &StockKey, delta: QuantityDelta) -> Result<EntryId> {
        Ok(self.state.lock().append(key, delta))
    }

    async fn insert_entry_once(
        &self,
        idempotency_key: &str,
        key: &StockKey,
        delta: QuantityDelta,
    ) -> Result<AppendOutcome> {
        let mut state = self.state.lock();
        if state.processed.contains_key(idempotency_key) {
            return Ok(AppendOutcome::Duplicate);
        }
        let id = state.append(key, delta);
        state.processed.insert(idempotency_key.to_string(), id);
        Ok(AppendOutcome::Appended(id))
    }

    async fn load_entries(&self, key: &StockKey, limit: Option<i64>) -> Result<Vec<JournalEntry>> {
        let state = self.state.lock();
        let take = limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(state.entries_for(key).take(take).cloned().collect())
    }

    async fn pending_keys(&self, min_entries: i64) -> Result<Vec<(StockKey, i64)>> {
        let state = self.state.lock();
        let mut counts: BTreeMap<StockKey, i64> = BTreeMap::new();
        for entry in state.journal.values() {
            *counts.entry(entry.key()).or_default() += 1;
        }
        Ok(counts.into_iter().filter(|(_, n)| *n >= min_entries).collect())
    }

    async fn snapshot(&self, key: &StockKey) -> Result<StockSnapshot> {
        let state = self.state.lock();
        let mut pending = QuantityDelta::default();
        let mut pending_entries = 0;
        for entry in state.entries_for(key) {
            pending = pending
                .checked_add(entry.delta())
                .ok_or_else(|| InventoryError::overflow(key, "sum of unconsumed deltas"))?;
            pending_entries += 1;
        }
        Ok(StockSnapshot {
            counters: state.counters.get(key).cloned().into_iter().collect(),
            pending,
            pending_entries,
        })
    }

    async fn scan_counters(&self, below: Option<i64>) -> Result<Vec<InventoryCounter>> {
        let state = self.state.lock();
        Ok(state
            .counters
            .values()
            .filter(|c| below.map_or(true, |t| c.quantity_on_hand < t))
            .cloned()
            .collect())
    }

    async fn register_counter(&self, counter: &InventoryCounter) -> Result<bool> {
        let mut state = self.state.lock();
        let key = counter.key();
        if state.counters.contains_key(&key) {
            return Ok(false);
        }
        state.counters.insert(key, counter.clone());
        Ok(true)
    }

    async fn try_insert_lock(&self, lock: &LockRecord) -> Result<bool> {
        let mut state = self.state.lock();
        let key = lock.key();
        if state.locks.contains_key(&key) {
            return Ok(false);
        }
        state.locks.insert(key, lock.clone());
        Ok(true)
    }

    async fn reclaim_expired_lock(&self, lock: &LockRecord) -> Result<bool> {
        let mut state = self.state.lock();
        match state.locks.get_mut(&lock.key()) {
            Some(existing) if existing.is_expired(Utc::now()) => {
                *existing = lock.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_lock(&self, key: &StockKey, holder: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        if state.locks.get(key).is_some_and(|l| l.holder == holder) {
            state.locks.remove(key);
        }
        Ok(())
    }

    async fn apply_rollup(&self, rollup: &Rollup, holder: Uuid) -> Result<InventoryCounter> {
        let mut state = self.state.lock();
        let key = &rollup.key;

        if !state.locks.get(key).is_some_and(|l| l.holder == holder) {
            return Err(InventoryError::LockLost { key: key.clone() });
        }
        for id in &rollup.ids {
            match state.journal.get(id) {
                Some(entry) if entry.key() == *key => {}
                _ => {
                    return Err(InventoryError::DataIntegrity(format!(
                        "rollup for {} references journal entry {} that no longer exists",
                        key, id
                    )))
                }
            }
        }

        let base = state
            .counters
            .get(key)
            .cloned()
            .unwrap_or_else(|| InventoryCounter::new(key, 0, 0));
        let updated = base
            .with_delta(rollup.delta)
            .ok_or_else(|| InventoryError::overflow(key, "base counter plus rollup"))?;

        // Validation is done; nothing below can fail.
        for id in &rollup.ids {
            state.journal.remove(id);
        }
        state.counters.insert(key.clone(), updated.clone());
        Ok(updated)
    }
}
