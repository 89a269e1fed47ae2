diesel::table! {
    inventory_counters (sku_code, warehouse_id) {
        sku_code -> Varchar,
        warehouse_id -> Int4,
        quantity_on_hand -> Int8,
        allocated_quantity -> Int8,
        reorder_minimum -> Int8,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    inventory_journal (id) {
        id -> Int8,
        sku_code -> Varchar,
        warehouse_id -> Int4,
        quantity_on_hand_delta -> Int8,
        allocated_quantity_delta -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    compaction_locks (sku_code, warehouse_id) {
        sku_code -> Varchar,
        warehouse_id -> Int4,
        holder -> Uuid,
        acquired_at -> Timestamptz,
        expires_at -> Timestamptz,
    }
}

diesel::table! {
    processed_events (idempotency_key) {
        idempotency_key -> Varchar,
        entry_id -> Int8,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    inventory_counters,
    inventory_journal,
    compaction_locks,
    processed_events,
);
