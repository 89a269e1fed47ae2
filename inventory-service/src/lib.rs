//! Inventory delta journal and compaction engine.
//!
//! Writers append signed deltas to a journal without taking any lock. A
//! background scheduler periodically folds each key's journal into its base
//! counter under a per-key lease, deleting exactly the rows it summed in the
//! same transaction that updates the counter. Point reads add the unmerged
//! deltas to the base, so they are exact whenever compaction last ran.

pub mod api;
pub mod error;
pub mod handlers;
pub mod journal;
pub mod lock;
pub mod low_stock;
pub mod merge;
pub mod models;
pub mod rollup;
pub mod scheduler;
pub mod schema;
pub mod service;
pub mod storage;
pub mod view;

pub use error::{InventoryError, Result};
pub use merge::CompactionOutcome;
pub use service::InventoryService;
