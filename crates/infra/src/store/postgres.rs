//! Postgres-backed slot/item store.
//!
//! ## Locking
//!
//! Writers lock rows with `SELECT … FOR UPDATE` inside a transaction. Several
//! slots are always locked in one statement ordered by `id`, so two
//! transactions touching the same pair of slots acquire them in the same order.
//!
//! ## Error Mapping
//!
//! | SQLSTATE | Meaning | Mapped to |
//! |----------|---------|-----------|
//! | `23505` | unique violation on `slots.code` | `DomainError::DuplicateCode` |
//! | `23503` | foreign key violation on `items.slot_id` | `DomainError::SlotNotFound` |
//! | `23514` | `slots_count_within_capacity` on a slot write | `DomainError::CapacityExceeded` |
//! | `23514` | any other check constraint | `DomainError::Validation` |
//! | `40001` | serialization failure | `RepositoryError::ConcurrentModification` |
//! | `40P01` | deadlock detected | `RepositoryError::ConcurrentModification` |
//! | `55P03` | lock not available | `RepositoryError::ConcurrentModification` |
//! | other | | `RepositoryError::Storage` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use slotkeeper_core::{DomainError, ItemId, SlotId};
use slotkeeper_inventory::{Item, ItemName, Slot, SlotCode};

use super::{InventoryStore, StoreTransaction};
use crate::error::{RepositoryError, RepositoryResult};
use crate::schema::COUNT_WITHIN_CAPACITY;

/// Postgres-backed store. Cloning shares the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn begin<'a>(&'a self) -> RepositoryResult<Box<dyn StoreTransaction + 'a>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn get_slot(&self, id: SlotId) -> RepositoryResult<Option<Slot>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, capacity, current_item_count, created_at, updated_at
            FROM slots
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_slot", e))?;

        row.as_ref().map(slot_from_row).transpose()
    }

    async fn find_slot_by_code(&self, code: &SlotCode) -> RepositoryResult<Option<Slot>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, capacity, current_item_count, created_at, updated_at
            FROM slots
            WHERE code = $1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_slot_by_code", e))?;

        row.as_ref().map(slot_from_row).transpose()
    }

    async fn list_slots(&self) -> RepositoryResult<Vec<Slot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, code, capacity, current_item_count, created_at, updated_at
            FROM slots
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_slots", e))?;

        rows.iter().map(slot_from_row).collect()
    }

    async fn get_item(&self, id: ItemId) -> RepositoryResult<Option<Item>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, price, quantity, slot_id, created_at, updated_at
            FROM items
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_item", e))?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn list_items(&self) -> RepositoryResult<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, price, quantity, slot_id, created_at, updated_at
            FROM items
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_items", e))?;

        rows.iter().map(item_from_row).collect()
    }

    async fn items_in_slot(&self, slot_id: SlotId) -> RepositoryResult<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, price, quantity, slot_id, created_at, updated_at
            FROM items
            WHERE slot_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(slot_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("items_in_slot", e))?;

        rows.iter().map(item_from_row).collect()
    }

    async fn unassigned_items(&self) -> RepositoryResult<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, price, quantity, slot_id, created_at, updated_at
            FROM items
            WHERE slot_id IS NULL
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("unassigned_items", e))?;

        rows.iter().map(item_from_row).collect()
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn use_snapshot(&mut self) -> RepositoryResult<()> {
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("use_snapshot", e))?;
        Ok(())
    }

    async fn lock_slots(&mut self, ids: &[SlotId]) -> RepositoryResult<Vec<Slot>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let mut uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        uuids.sort_unstable();
        uuids.dedup();

        let rows = sqlx::query(
            r#"
            SELECT id, code, capacity, current_item_count, created_at, updated_at
            FROM slots
            WHERE id = ANY($1)
            ORDER BY id ASC
            FOR UPDATE
            "#,
        )
        .bind(&uuids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_slots", e))?;

        rows.iter().map(slot_from_row).collect()
    }

    async fn lock_all_slots(&mut self) -> RepositoryResult<Vec<Slot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, code, capacity, current_item_count, created_at, updated_at
            FROM slots
            ORDER BY id ASC
            FOR UPDATE
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_all_slots", e))?;

        rows.iter().map(slot_from_row).collect()
    }

    async fn lock_item(&mut self, id: ItemId) -> RepositoryResult<Option<Item>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, price, quantity, slot_id, created_at, updated_at
            FROM items
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_item", e))?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn items(&mut self) -> RepositoryResult<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, price, quantity, slot_id, created_at, updated_at
            FROM items
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("items", e))?;

        rows.iter().map(item_from_row).collect()
    }

    async fn insert_slot(&mut self, slot: &Slot) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO slots (id, code, capacity, current_item_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(slot.id_typed().as_uuid())
        .bind(slot.code().as_str())
        .bind(slot.capacity())
        .bind(slot.current_item_count())
        .bind(slot.created_at())
        .bind(slot.updated_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| slot_write_error(e, slot, "insert_slot"))?;
        Ok(())
    }

    async fn update_slot(&mut self, slot: &Slot) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE slots
            SET code = $2,
                capacity = $3,
                current_item_count = $4,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(slot.id_typed().as_uuid())
        .bind(slot.code().as_str())
        .bind(slot.capacity())
        .bind(slot.current_item_count())
        .bind(slot.updated_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| slot_write_error(e, slot, "update_slot"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::SlotNotFound(slot.id_typed()).into());
        }
        Ok(())
    }

    async fn delete_slot(&mut self, id: SlotId) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM slots WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_slot", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::SlotNotFound(id).into());
        }
        Ok(())
    }

    async fn insert_item(&mut self, item: &Item) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO items (id, name, price, quantity, slot_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(item.id_typed().as_uuid())
        .bind(item.name().as_str())
        .bind(item.price())
        .bind(item.quantity())
        .bind(item.slot_id().map(Uuid::from))
        .bind(item.created_at())
        .bind(item.updated_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| foreign_key_or(e, item.slot_id(), "insert_item"))?;
        Ok(())
    }

    async fn update_item(&mut self, item: &Item) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE items
            SET name = $2,
                price = $3,
                quantity = $4,
                slot_id = $5,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(item.id_typed().as_uuid())
        .bind(item.name().as_str())
        .bind(item.price())
        .bind(item.quantity())
        .bind(item.slot_id().map(Uuid::from))
        .bind(item.updated_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| foreign_key_or(e, item.slot_id(), "update_item"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ItemNotFound(item.id_typed()).into());
        }
        Ok(())
    }

    async fn delete_item(&mut self, id: ItemId) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM items WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_item", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ItemNotFound(id).into());
        }
        Ok(())
    }

    async fn detach_items(&mut self, slot_id: SlotId, now: DateTime<Utc>) -> RepositoryResult<Vec<ItemId>> {
        let rows = sqlx::query(
            r#"
            UPDATE items
            SET slot_id = NULL,
                updated_at = $2
            WHERE slot_id = $1
            RETURNING id
            "#,
        )
        .bind(slot_id.as_uuid())
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("detach_items", e))?;

        let mut ids = rows
            .iter()
            .map(|r| {
                r.try_get::<Uuid, _>("id")
                    .map(ItemId::from_uuid)
                    .map_err(|e| RepositoryError::storage(format!("failed to read item id: {e}")))
            })
            .collect::<RepositoryResult<Vec<_>>>()?;
        ids.sort_unstable();
        Ok(ids)
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

// SQLx row types

#[derive(Debug)]
struct SlotRow {
    id: Uuid,
    code: String,
    capacity: i64,
    current_item_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for SlotRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SlotRow {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            capacity: row.try_get("capacity")?,
            current_item_count: row.try_get("current_item_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<SlotRow> for Slot {
    type Error = RepositoryError;

    fn try_from(row: SlotRow) -> Result<Self, Self::Error> {
        let code = SlotCode::parse(&row.code)
            .map_err(|e| RepositoryError::storage(format!("stored slot code is invalid: {e}")))?;
        Ok(Slot::restore(
            SlotId::from_uuid(row.id),
            code,
            row.capacity,
            row.current_item_count,
            row.created_at,
            row.updated_at,
        ))
    }
}

#[derive(Debug)]
struct ItemRow {
    id: Uuid,
    name: String,
    price: i64,
    quantity: i64,
    slot_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            price: row.try_get("price")?,
            quantity: row.try_get("quantity")?,
            slot_id: row.try_get("slot_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<ItemRow> for Item {
    type Error = RepositoryError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        let name = ItemName::parse(&row.name)
            .map_err(|e| RepositoryError::storage(format!("stored item name is invalid: {e}")))?;
        Ok(Item::restore(
            ItemId::from_uuid(row.id),
            name,
            row.price,
            row.quantity,
            row.slot_id.map(SlotId::from_uuid),
            row.created_at,
            row.updated_at,
        ))
    }
}

fn slot_from_row(row: &PgRow) -> RepositoryResult<Slot> {
    SlotRow::from_row(row)
        .map_err(|e| RepositoryError::storage(format!("failed to deserialize slot row: {e}")))?
        .try_into()
}

fn item_from_row(row: &PgRow) -> RepositoryResult<Item> {
    ItemRow::from_row(row)
        .map_err(|e| RepositoryError::storage(format!("failed to deserialize item row: {e}")))?
        .try_into()
}

/// Constraint violations on a slot write, mapped to the domain error they mean.
fn slot_write_error(err: sqlx::Error, slot: &Slot, operation: &str) -> RepositoryError {
    if has_sqlstate(&err, "23505") {
        return DomainError::duplicate_code(slot.code().as_str()).into();
    }
    if violates_constraint(&err, COUNT_WITHIN_CAPACITY) {
        return DomainError::capacity_exceeded(
            slot.id_typed(),
            slot.capacity(),
            slot.current_item_count(),
            0,
        )
        .into();
    }
    map_sqlx_error(operation, err)
}

fn violates_constraint(err: &sqlx::Error, name: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(name),
        _ => false,
    }
}

/// Foreign key violations on `items.slot_id` mean the referenced slot is gone.
fn foreign_key_or(err: sqlx::Error, slot_id: Option<SlotId>, operation: &str) -> RepositoryError {
    match slot_id {
        Some(slot_id) if has_sqlstate(&err, "23503") => DomainError::SlotNotFound(slot_id).into(),
        _ => map_sqlx_error(operation, err),
    }
}

fn has_sqlstate(err: &sqlx::Error, state: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == state;
        }
    }
    false
}

/// Map SQLx errors to RepositoryError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") | Some("55P03") => RepositoryError::ConcurrentModification(msg),
                Some("23514") => DomainError::validation(msg).into(),
                _ => RepositoryError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            RepositoryError::Storage(format!("timed out acquiring a connection in {}", operation))
        }
        _ => RepositoryError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
