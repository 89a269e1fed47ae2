use std::sync::Arc;

use shared::{QuantityDelta, StockKey};
use tracing::debug;

use crate::error::Result;
use crate::storage::{AppendOutcome, EntryId, StorageEngine};

/// Appends immutable delta rows. Takes no lock and reads nothing first, so
/// writers of the same key never wait on each other.
#[derive(Clone)]
pub struct JournalWriter {
    storage: Arc<dyn StorageEngine>,
}

impl JournalWriter {
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self { storage }
    }

    /// Not idempotent: a retried call appends a second row.
    pub async fn append_delta(&self, key: &StockKey, delta: QuantityDelta) -> Result<EntryId> {
        let id = self.storage.insert_entry(key, delta).await?;
        debug!(
            "Appended journal entry {} for {} (qoh {:+}, allocated {:+})",
            id, key, delta.quantity_on_hand, delta.allocated_quantity
        );
        Ok(id)
    }

    /// Like [`append_delta`](Self::append_delta), but a second call with the
    /// same `idempotency_key` writes nothing and reports a duplicate.
    pub async fn append_delta_once(
        &self,
        idempotency_key: &str,
        key: &StockKey,
        delta: QuantityDelta,
    ) -> Result<AppendOutcome> {
        let outcome = self.storage.insert_entry_once(idempotency_key, key, delta).await?;
        match outcome {
            AppendOutcome::Appended(id) => debug!("Appended journal entry {} for {}", id, key),
            AppendOutcome::Duplicate => {
                debug!("Skipped duplicate delta {} for {}", idempotency_key, key)
            }
        }
        Ok(outcome)
    }
}
