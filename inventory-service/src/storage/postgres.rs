use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::dsl::{count_star, now, sum};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_traits::ToPrimitive;
use shared::{QuantityDelta, StockKey};
use tracing::{error, info};
use uuid::Uuid;

use super::{AppendOutcome, EntryId, StockSnapshot, StorageEngine};
use crate::error::{InventoryError, Result};
use crate::models::*;
use crate::rollup::Rollup;
use crate::schema::*;

type DbPool = Pool<AsyncPgConnection>;

/// Postgres-backed engine. Lock rows rely on the primary key of
/// `compaction_locks` for uniqueness; merges run in one database transaction.
#[derive(Clone)]
pub struct PgStorage {
    pool: DbPool,
}

impl PgStorage {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(max_connections)
            .build(config)
            .await
            .map_err(|e| InventoryError::Storage(format!("connection pool: {}", e)))?;
        info!("Connected to Postgres with a pool of {} connections", max_connections);
        Ok(Self::new(pool))
    }
}

fn to_quantity(key: &StockKey, value: Option<BigDecimal>, what: &str) -> Result<i64> {
    match value {
        None => Ok(0),
        Some(v) => v
            .to_i64()
            .ok_or_else(|| InventoryError::overflow(key, format!("sum of {} does not fit i64", what))),
    }
}

#[async_trait]
impl StorageEngine for PgStorage {
    async fn insert_entry(&self, key: &StockKey, delta: QuantityDelta) -> Result<EntryId> {
        let mut conn = self.pool.get().await?;

        let id = diesel::insert_into(inventory_journal::table)
            .values(&NewJournalEntry::new(key, delta))
            .returning(inventory_journal::id)
            .get_result::<i64>(&mut conn)
            .await?;

        Ok(id)
    }

    async fn insert_entry_once(
        &self,
        idempotency_key: &str,
        key: &StockKey,
        delta: QuantityDelta,
    ) -> Result<AppendOutcome> {
        let mut conn = self.pool.get().await?;
        let new_entry = NewJournalEntry::new(key, delta);
        let idempotency_key = idempotency_key.to_string();

        let result = conn
            .transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    let id = diesel::insert_into(inventory_journal::table)
                        .values(&new_entry)
                        .returning(inventory_journal::id)
                        .get_result::<i64>(conn)
                        .await?;

                    // A concurrent or earlier insert of the same key aborts the whole transaction.
                    diesel::insert_into(processed_events::table)
                        .values(&ProcessedEvent {
                            idempotency_key,
                            entry_id: id,
                            processed_at: Some(Utc::now()),
                        })
                        .execute(conn)
                        .await?;

                    Ok(id)
                })
            })
            .await;

        match result {
            Ok(id) => Ok(AppendOutcome::Appended(id)),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Ok(AppendOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_entries(&self, key: &StockKey, limit: Option<i64>) -> Result<Vec<JournalEntry>> {
        let mut conn = self.pool.get().await?;

        let mut query = inventory_journal::table
            .filter(inventory_journal::sku_code.eq(key.sku_code.clone()))
            .filter(inventory_journal::warehouse_id.eq(key.warehouse_id))
            .order(inventory_journal::id.asc())
            .into_boxed();
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        let entries = query.load::<JournalEntry>(&mut conn).await?;
        Ok(entries)
    }

    async fn pending_keys(&self, min_entries: i64) -> Result<Vec<(StockKey, i64)>> {
        let mut conn = self.pool.get().await?;

        let rows = inventory_journal::table
            .group_by((inventory_journal::sku_code, inventory_journal::warehouse_id))
            .select((inventory_journal::sku_code, inventory_journal::warehouse_id, count_star()))
            .having(count_star().ge(min_entries))
            .load::<(String, i32, i64)>(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(sku_code, warehouse_id, n)| (StockKey::new(sku_code, warehouse_id), n))
            .collect())
    }

    async fn snapshot(&self, key: &StockKey) -> Result<StockSnapshot> {
        let mut conn = self.pool.get().await?;
        let key = key.clone();

        // Both reads must come from one snapshot, or a merge committing between
        // them would be observed half-applied.
        conn.build_transaction()
            .repeatable_read()
            .read_only()
            .run::<_, InventoryError, _>(|conn| {
                Box::pin(async move {
                    let counters = inventory_counters::table
                        .filter(inventory_counters::sku_code.eq(key.sku_code.clone()))
                        .filter(inventory_counters::warehouse_id.eq(key.warehouse_id))
                        .load::<InventoryCounter>(conn)
                        .await?;

                    let (qoh, alloc, pending_entries) = inventory_journal::table
                        .filter(inventory_journal::sku_code.eq(key.sku_code.clone()))
                        .filter(inventory_journal::warehouse_id.eq(key.warehouse_id))
                        .select((
                            sum(inventory_journal::quantity_on_hand_delta),
                            sum(inventory_journal::allocated_quantity_delta),
                            count_star(),
                        ))
                        .get_result::<(Option<BigDecimal>, Option<BigDecimal>, i64)>(conn)
                        .await?;

                    Ok(StockSnapshot {
                        counters,
                        pending: QuantityDelta::new(
                            to_quantity(&key, qoh, "quantity on hand deltas")?,
                            to_quantity(&key, alloc, "allocated quantity deltas")?,
                        ),
                        pending_entries,
                    })
                })
            })
            .await
    }

    async fn scan_counters(&self, below: Option<i64>) -> Result<Vec<InventoryCounter>> {
        let mut conn = self.pool.get().await?;

        let mut query = inventory_counters::table
            .order((inventory_counters::sku_code.asc(), inventory_counters::warehouse_id.asc()))
            .into_boxed();
        if let Some(threshold) = below {
            query = query.filter(inventory_counters::quantity_on_hand.lt(threshold));
        }

        let counters = query.load::<InventoryCounter>(&mut conn).await?;
        Ok(counters)
    }

    async fn register_counter(&self, counter: &InventoryCounter) -> Result<bool> {
        let mut conn = self.pool.get().await?;

        let inserted = diesel::insert_into(inventory_counters::table)
            .values(counter)
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;

        Ok(inserted == 1)
    }

    async fn try_insert_lock(&self, lock: &LockRecord) -> Result<bool> {
        let mut conn = self.pool.get().await?;

        let inserted = diesel::insert_into(compaction_locks::table)
            .values(lock)
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;

        Ok(inserted == 1)
    }

    async fn reclaim_expired_lock(&self, lock: &LockRecord) -> Result<bool> {
        let mut conn = self.pool.get().await?;

        let updated = diesel::update(
            compaction_locks::table
                .filter(compaction_locks::sku_code.eq(lock.sku_code.clone()))
                .filter(compaction_locks::warehouse_id.eq(lock.warehouse_id))
                .filter(compaction_locks::expires_at.le(now)),
        )
        .set((
            compaction_locks::holder.eq(lock.holder),
            compaction_locks::acquired_at.eq(lock.acquired_at),
            compaction_locks::expires_at.eq(lock.expires_at),
        ))
        .execute(&mut conn)
        .await?;

        Ok(updated == 1)
    }

    async fn delete_lock(&self, key: &StockKey, holder: Uuid) -> Result<()> {
        let mut conn = self.pool.get().await?;

        diesel::delete(
            compaction_locks::table
                .filter(compaction_locks::sku_code.eq(key.sku_code.clone()))
                .filter(compaction_locks::warehouse_id.eq(key.warehouse_id))
                .filter(compaction_locks::holder.eq(holder)),
        )
        .execute(&mut conn)
        .await?;

        Ok(())
    }

    async fn apply_rollup(&self, rollup: &Rollup, holder: Uuid) -> Result<InventoryCounter> {
        let mut conn = self.pool.get().await?;
        let rollup = rollup.clone();

        conn.transaction::<_, InventoryError, _>(|conn| {
            Box::pin(async move {
                let key = &rollup.key;

                // Row lock on our lease: a reclaim by another worker waits for this commit.
                let still_held = compaction_locks::table
                    .filter(compaction_locks::sku_code.eq(key.sku_code.clone()))
                    .filter(compaction_locks::warehouse_id.eq(key.warehouse_id))
                    .filter(compaction_locks::holder.eq(holder))
                    .select(compaction_locks::holder)
                    .for_update()
                    .first::<Uuid>(conn)
                    .await
                    .optional()?;
                if still_held.is_none() {
                    return Err(InventoryError::LockLost { key: key.clone() });
                }

                let deleted = diesel::delete(
                    inventory_journal::table
                        .filter(inventory_journal::id.eq_any(rollup.ids.clone()))
                        .filter(inventory_journal::sku_code.eq(key.sku_code.clone()))
                        .filter(inventory_journal::warehouse_id.eq(key.warehouse_id)),
                )
                .execute(conn)
                .await?;
                if deleted != rollup.ids.len() {
                    error!(
                        "Rollup for {} covered {} entries but only {} were present",
                        key,
                        rollup.ids.len(),
                        deleted
                    );
                    return Err(InventoryError::DataIntegrity(format!(
                        "rollup for {} references {} journal entries that no longer exist",
                        key,
                        rollup.ids.len() - deleted
                    )));
                }

                let counters = inventory_counters::table
                    .filter(inventory_counters::sku_code.eq(key.sku_code.clone()))
                    .filter(inventory_counters::warehouse_id.eq(key.warehouse_id))
                    .for_update()
                    .load::<InventoryCounter>(conn)
                    .await?;
                let base = match counters.as_slice() {
                    [] => InventoryCounter::new(key, 0, 0),
                    [counter] => counter.clone(),
                    many => {
                        return Err(InventoryError::DataIntegrity(format!(
                            "{} base counter rows for {}",
                            many.len(),
                            key
                        )))
                    }
                };
                let updated = base
                    .with_delta(rollup.delta)
                    .ok_or_else(|| InventoryError::overflow(key, "base counter plus rollup"))?;

                diesel::insert_into(inventory_counters::table)
                    .values(&updated)
                    .on_conflict((inventory_counters::sku_code, inventory_counters::warehouse_id))
                    .do_update()
                    .set((
                        inventory_counters::quantity_on_hand.eq(updated.quantity_on_hand),
                        inventory_counters::allocated_quantity.eq(updated.allocated_quantity),
                        inventory_counters::updated_at.eq(updated.updated_at),
                    ))
                    .execute(conn)
                    .await?;

                Ok(updated)
            })
        })
        .await
    }
}
