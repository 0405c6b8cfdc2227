//! Relational layout of slots and items.
//!
//! `apply` is idempotent and only creates what is missing; it is not a
//! migration framework.

use sqlx::PgPool;

use crate::error::{RepositoryError, RepositoryResult};

/// Name of the CHECK keeping `current_item_count` within `[0, capacity]`.
pub const COUNT_WITHIN_CAPACITY: &str = "slots_count_within_capacity";

/// DDL for the `slots` and `items` tables.
///
/// The CHECK constraints back up the repository-maintained count invariant:
/// a write that would push a counter outside `[0, capacity]` fails in the
/// database even if it bypassed the repositories.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS slots (
    id                 UUID PRIMARY KEY,
    code               VARCHAR(32) NOT NULL UNIQUE,
    capacity           BIGINT NOT NULL CHECK (capacity >= 0),
    current_item_count BIGINT NOT NULL DEFAULT 0,
    created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT slots_count_within_capacity
        CHECK (current_item_count >= 0 AND current_item_count <= capacity)
);

CREATE TABLE IF NOT EXISTS items (
    id         UUID PRIMARY KEY,
    name       VARCHAR(255) NOT NULL,
    price      BIGINT NOT NULL CHECK (price >= 0),
    slot_id    UUID NULL REFERENCES slots (id) ON DELETE SET NULL,
    quantity   BIGINT NOT NULL DEFAULT 0 CHECK (quantity >= 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS items_slot_id_idx ON items (slot_id);
"#;

/// Advisory lock key serializing concurrent `apply` calls.
const SCHEMA_LOCK_KEY: i64 = 0x5107_6EE9;

/// Create the tables and index if they do not exist yet.
///
/// Concurrent callers are serialized with a transaction-scoped advisory lock,
/// since `CREATE TABLE IF NOT EXISTS` races with itself.
pub async fn apply(pool: &PgPool) -> RepositoryResult<()> {
    let map = |e: sqlx::Error| RepositoryError::storage(format!("failed to apply schema: {e}"));

    let mut tx = pool.begin().await.map_err(map)?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .map_err(map)?;
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&mut *tx)
        .await
        .map_err(map)?;
    tx.commit().await.map_err(map)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_widths_match_value_object_limits() {
        use slotkeeper_inventory::{ItemName, SlotCode};
        assert!(SCHEMA_SQL.contains(&format!("VARCHAR({})", SlotCode::MAX_LEN)));
        assert!(SCHEMA_SQL.contains(&format!("VARCHAR({})", ItemName::MAX_LEN)));
    }

    #[test]
    fn count_constraint_is_named() {
        assert!(SCHEMA_SQL.contains(&format!("CONSTRAINT {COUNT_WITHIN_CAPACITY}")));
    }

    #[test]
    fn slot_deletion_detaches_items() {
        assert!(SCHEMA_SQL.contains("REFERENCES slots (id) ON DELETE SET NULL"));
    }
}
