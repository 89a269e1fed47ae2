//! Shared fixtures for the integration tests.
//!
//! `HookedStorage` wraps the in-memory engine and can hold, fail, or
//! interleave writes with the merge transaction.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use inventory_service::error::{InventoryError, Result};
use inventory_service::models::{InventoryCounter, JournalEntry, LockRecord};
use inventory_service::rollup::Rollup;
use inventory_service::storage::{AppendOutcome, EntryId, MemoryStorage, StockSnapshot, StorageEngine};
use inventory_service::InventoryService;
use parking_lot::Mutex;
use shared::{QuantityDelta, StockKey};
use tokio::sync::Semaphore;
use uuid::Uuid;

pub fn key_a1() -> StockKey {
    StockKey::new("A", 1)
}

pub fn service_on(storage: Arc<dyn StorageEngine>) -> InventoryService {
    InventoryService::new(storage, Duration::seconds(30), None).unwrap()
}

/// In-memory service with `A@1` registered at `initial` units on hand.
pub async fn seeded_service(initial: i64) -> (Arc<MemoryStorage>, InventoryService) {
    let storage = Arc::new(MemoryStorage::new());
    let service = service_on(storage.clone());
    service.register_counter(&key_a1(), initial, 0).await.unwrap();
    (storage, service)
}

pub struct HookedStorage {
    pub inner: Arc<MemoryStorage>,
    merge_gate: Option<Arc<Semaphore>>,
    append_during_merge: Mutex<Option<QuantityDelta>>,
    fail_merges: AtomicBool,
}

impl HookedStorage {
    pub fn new(inner: Arc<MemoryStorage>) -> Self {
        Self {
            inner,
            merge_gate: None,
            append_during_merge: Mutex::new(None),
            fail_merges: AtomicBool::new(false),
        }
    }

    /// Every merge transaction waits for a permit from `gate` before running.
    pub fn with_merge_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.merge_gate = Some(gate);
        self
    }

    /// The next merge sees `delta` appended after its rollup was computed.
    pub fn append_during_next_merge(&self, delta: QuantityDelta) {
        *self.append_during_merge.lock() = Some(delta);
    }

    pub fn fail_merges(&self, fail: bool) {
        self.fail_merges.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageEngine for HookedStorage {
    async fn insert_entry(&self, key: &StockKey, delta: QuantityDelta) -> Result<EntryId> {
        self.inner.insert_entry(key, delta).await
    }

    async fn insert_entry_once(
        &self,
        idempotency_key: &str,
        key: &StockKey,
        delta: QuantityDelta,
    ) -> Result<AppendOutcome> {
        self.inner.insert_entry_once(idempotency_key, key, delta).await
    }

    async fn load_entries(&self, key: &StockKey, limit: Option<i64>) -> Result<Vec<JournalEntry>> {
        self.inner.load_entries(key, limit).await
    }

    async fn pending_keys(&self, min_entries: i64) -> Result<Vec<(StockKey, i64)>> {
        self.inner.pending_keys(min_entries).await
    }

    async fn snapshot(&self, key: &StockKey) -> Result<StockSnapshot> {
        self.inner.snapshot(key).await
    }

    async fn scan_counters(&self, below: Option<i64>) -> Result<Vec<InventoryCounter>> {
        self.inner.scan_counters(below).await
    }

    async fn register_counter(&self, counter: &InventoryCounter) -> Result<bool> {
        self.inner.register_counter(counter).await
    }

    async fn try_insert_lock(&self, lock: &LockRecord) -> Result<bool> {
        self.inner.try_insert_lock(lock).await
    }

    async fn reclaim_expired_lock(&self, lock: &LockRecord) -> Result<bool> {
        self.inner.reclaim_expired_lock(lock).await
    }

    async fn delete_lock(&self, key: &StockKey, holder: Uuid) -> Result<()> {
        self.inner.delete_lock(key, holder).await
    }

    async fn apply_rollup(&self, rollup: &Rollup, holder: Uuid) -> Result<InventoryCounter> {
        if let Some(gate) = &self.merge_gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        let late = self.append_during_merge.lock().take();
        if let Some(delta) = late {
            self.inner.insert_entry(&rollup.key, delta).await?;
        }
        if self.fail_merges.load(Ordering::SeqCst) {
            return Err(InventoryError::Storage("injected transaction abort".to_string()));
        }
        self.inner.apply_rollup(rollup, holder).await
    }
}
