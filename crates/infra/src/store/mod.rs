//! Storage boundary for slots and items.
//!
//! A store provides lock-free reads of committed state and transactional
//! units of work for writes. Repositories are the only writers; they never
//! touch a store outside a [`StoreTransaction`].

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use slotkeeper_core::{ItemId, SlotId};
use slotkeeper_inventory::{Item, Slot, SlotCode};

use crate::error::RepositoryResult;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;

/// Persistent state of slots and items.
///
/// ## Reads
///
/// Read methods see the last committed state and take no locks. Results may be
/// stale by the time the caller acts on them.
///
/// ## Writes
///
/// `begin()` opens a unit of work. Nothing it does is visible to readers until
/// `commit()`; dropping or rolling back a transaction discards every change.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn begin<'a>(&'a self) -> RepositoryResult<Box<dyn StoreTransaction + 'a>>;

    async fn get_slot(&self, id: SlotId) -> RepositoryResult<Option<Slot>>;

    async fn find_slot_by_code(&self, code: &SlotCode) -> RepositoryResult<Option<Slot>>;

    /// All slots, ordered by id.
    async fn list_slots(&self) -> RepositoryResult<Vec<Slot>>;

    async fn get_item(&self, id: ItemId) -> RepositoryResult<Option<Item>>;

    /// All items, ordered by id.
    async fn list_items(&self) -> RepositoryResult<Vec<Item>>;

    /// Items whose `slot_id` is `slot_id`, ordered by id.
    async fn items_in_slot(&self, slot_id: SlotId) -> RepositoryResult<Vec<Item>>;

    /// Items with no slot, ordered by id.
    async fn unassigned_items(&self) -> RepositoryResult<Vec<Item>>;
}

/// One unit of work against an [`InventoryStore`].
///
/// Locking methods serialize writers: a slot or item locked here cannot be
/// locked by another transaction until this one ends.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Make every later read in this transaction see one consistent snapshot.
    /// Must be called before any other method.
    async fn use_snapshot(&mut self) -> RepositoryResult<()>;

    /// Lock the given slots in ascending id order and return those that exist,
    /// in that order. Duplicate ids are locked once.
    async fn lock_slots(&mut self, ids: &[SlotId]) -> RepositoryResult<Vec<Slot>>;

    /// Lock every slot, in ascending id order.
    async fn lock_all_slots(&mut self) -> RepositoryResult<Vec<Slot>>;

    async fn lock_item(&mut self, id: ItemId) -> RepositoryResult<Option<Item>>;

    /// All items as seen by this transaction, ordered by id.
    async fn items(&mut self) -> RepositoryResult<Vec<Item>>;

    /// Fails with `DuplicateCode` if another slot has the same code.
    async fn insert_slot(&mut self, slot: &Slot) -> RepositoryResult<()>;

    /// Fails with `SlotNotFound` if absent, `DuplicateCode` on a code clash.
    async fn update_slot(&mut self, slot: &Slot) -> RepositoryResult<()>;

    /// Remove the slot record. Items still pointing at it are detached, as
    /// with `ON DELETE SET NULL`.
    async fn delete_slot(&mut self, id: SlotId) -> RepositoryResult<()>;

    /// Fails with `SlotNotFound` if the item references a missing slot.
    async fn insert_item(&mut self, item: &Item) -> RepositoryResult<()>;

    async fn update_item(&mut self, item: &Item) -> RepositoryResult<()>;

    async fn delete_item(&mut self, id: ItemId) -> RepositoryResult<()>;

    /// Clear `slot_id` on every item referencing `slot_id`, returning their ids
    /// in ascending order.
    async fn detach_items(&mut self, slot_id: SlotId, now: DateTime<Utc>) -> RepositoryResult<Vec<ItemId>>;

    async fn commit(self: Box<Self>) -> RepositoryResult<()>;

    async fn rollback(self: Box<Self>) -> RepositoryResult<()>;
}

#[async_trait]
impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    async fn begin<'a>(&'a self) -> RepositoryResult<Box<dyn StoreTransaction + 'a>> {
        (**self).begin().await
    }

    async fn get_slot(&self, id: SlotId) -> RepositoryResult<Option<Slot>> {
        (**self).get_slot(id).await
    }

    async fn find_slot_by_code(&self, code: &SlotCode) -> RepositoryResult<Option<Slot>> {
        (**self).find_slot_by_code(code).await
    }

    async fn list_slots(&self) -> RepositoryResult<Vec<Slot>> {
        (**self).list_slots().await
    }

    async fn get_item(&self, id: ItemId) -> RepositoryResult<Option<Item>> {
        (**self).get_item(id).await
    }

    async fn list_items(&self) -> RepositoryResult<Vec<Item>> {
        (**self).list_items().await
    }

    async fn items_in_slot(&self, slot_id: SlotId) -> RepositoryResult<Vec<Item>> {
        (**self).items_in_slot(slot_id).await
    }

    async fn unassigned_items(&self) -> RepositoryResult<Vec<Item>> {
        (**self).unassigned_items().await
    }
}
