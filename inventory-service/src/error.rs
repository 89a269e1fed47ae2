use diesel_async::pooled_connection::PoolError;
use shared::StockKey;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, InventoryError>;

/// Failures surfaced by the journal and compaction engine.
///
/// Contention on a compaction lock is not an error; see
/// [`CompactionOutcome::Busy`](crate::merge::CompactionOutcome::Busy).
#[derive(Error, Debug)]
pub enum InventoryError {
    /// Engine-level failure. Transient; callers may retry with backoff.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A state that can only come from a bug elsewhere. Never corrected silently.
    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Quantity overflow for {key}: {detail}")]
    QuantityOverflow { key: StockKey, detail: String },

    /// The compaction lease was reclaimed by another worker before the merge committed.
    #[error("Compaction lock for {key} is no longer held")]
    LockLost { key: StockKey },

    /// A tuning value that would break locking or compaction; rejected at construction.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl InventoryError {
    pub fn overflow(key: &StockKey, detail: impl Into<String>) -> Self {
        Self::QuantityOverflow {
            key: key.clone(),
            detail: detail.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<diesel::result::Error> for InventoryError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<bb8::RunError<PoolError>> for InventoryError {
    fn from(e: bb8::RunError<PoolError>) -> Self {
        Self::Storage(format!("connection pool: {}", e))
    }
}
