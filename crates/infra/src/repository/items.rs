use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use slotkeeper_core::{DomainError, ItemId, SlotId};
use slotkeeper_inventory::{
    Assignment, Item, ItemName, plan_assignment_change, plan_placement, plan_quantity_change,
    plan_removal,
};

use super::finish;
use super::slots::apply_count_adjustments;
use crate::error::RepositoryResult;
use crate::retry::RetryPolicy;
use crate::store::{InventoryStore, StoreTransaction};

/// Item repository.
///
/// Every write that changes how much of an item sits in a slot adjusts that
/// slot's counter in the same transaction. Locks are taken item first, then
/// slots in ascending id order.
pub struct ItemRepository<S: ?Sized> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: ?Sized> Clone for ItemRepository<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retry: self.retry,
        }
    }
}

impl<S> ItemRepository<S>
where
    S: InventoryStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create an item, optionally placing it in a slot.
    ///
    /// With a slot, its count grows by `quantity`; fails with `SlotNotFound`
    /// or `CapacityExceeded` and then nothing is written.
    #[instrument(level = "debug", skip(self))]
    pub async fn create(
        &self,
        name: &str,
        price: i64,
        quantity: i64,
        slot_id: Option<SlotId>,
    ) -> RepositoryResult<Item> {
        let name = ItemName::parse(name)?;
        let item = Item::new(ItemId::new(), name, price, quantity, slot_id, Utc::now())?;
        let item = &item;
        self.retry
            .run("item.create", move || self.try_create(item))
            .await
    }

    async fn try_create(&self, item: &Item) -> RepositoryResult<Item> {
        let mut tx = self.store.begin().await?;
        let result = create_in(tx.as_mut(), item).await;
        finish(tx, result).await
    }

    /// Move an item to `slot_id`, or unassign it with `None`.
    ///
    /// The old slot loses the item's quantity and the new one gains it.
    /// Reassigning to the current slot changes nothing.
    #[instrument(level = "debug", skip(self))]
    pub async fn reassign(&self, item_id: ItemId, slot_id: Option<SlotId>) -> RepositoryResult<Item> {
        self.retry
            .run("item.reassign", move || self.try_reassign(item_id, slot_id))
            .await
    }

    async fn try_reassign(&self, item_id: ItemId, slot_id: Option<SlotId>) -> RepositoryResult<Item> {
        let mut tx = self.store.begin().await?;
        let result = reassign_in(tx.as_mut(), item_id, slot_id.into(), Utc::now()).await;
        finish(tx, result).await
    }

    /// Set an item's quantity; its slot (if any) absorbs the difference.
    #[instrument(level = "debug", skip(self))]
    pub async fn update_quantity(&self, item_id: ItemId, quantity: i64) -> RepositoryResult<Item> {
        if quantity < 0 {
            return Err(DomainError::validation("quantity must not be negative").into());
        }
        self.retry
            .run("item.update_quantity", move || {
                self.try_update_quantity(item_id, quantity)
            })
            .await
    }

    async fn try_update_quantity(&self, item_id: ItemId, quantity: i64) -> RepositoryResult<Item> {
        let mut tx = self.store.begin().await?;
        let result = update_quantity_in(tx.as_mut(), item_id, quantity, Utc::now()).await;
        finish(tx, result).await
    }

    /// Rename or reprice an item. Slot counts are unaffected.
    #[instrument(level = "debug", skip(self))]
    pub async fn update_details(&self, item_id: ItemId, name: &str, price: i64) -> RepositoryResult<Item> {
        let name = ItemName::parse(name)?;
        let name = &name;
        self.retry
            .run("item.update_details", move || {
                self.try_update_details(item_id, name, price)
            })
            .await
    }

    async fn try_update_details(&self, item_id: ItemId, name: &ItemName, price: i64) -> RepositoryResult<Item> {
        let mut tx = self.store.begin().await?;
        let result = update_details_in(tx.as_mut(), item_id, name, price, Utc::now()).await;
        finish(tx, result).await
    }

    /// Delete an item, releasing its quantity from its slot. Returns the
    /// removed item.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete(&self, item_id: ItemId) -> RepositoryResult<Item> {
        self.retry
            .run("item.delete", move || self.try_delete(item_id))
            .await
    }

    async fn try_delete(&self, item_id: ItemId) -> RepositoryResult<Item> {
        let mut tx = self.store.begin().await?;
        let result = delete_in(tx.as_mut(), item_id, Utc::now()).await;
        finish(tx, result).await
    }

    pub async fn get(&self, item_id: ItemId) -> RepositoryResult<Item> {
        self.store
            .get_item(item_id)
            .await?
            .ok_or_else(|| DomainError::ItemNotFound(item_id).into())
    }

    pub async fn list(&self) -> RepositoryResult<Vec<Item>> {
        self.store.list_items().await
    }

    pub async fn list_unassigned(&self) -> RepositoryResult<Vec<Item>> {
        self.store.unassigned_items().await
    }
}

async fn lock_item(tx: &mut (dyn StoreTransaction + '_), item_id: ItemId) -> RepositoryResult<Item> {
    tx.lock_item(item_id)
        .await?
        .ok_or_else(|| DomainError::ItemNotFound(item_id).into())
}

async fn create_in(tx: &mut (dyn StoreTransaction + '_), item: &Item) -> RepositoryResult<Item> {
    let plan = plan_placement(item.assignment(), item.quantity());
    apply_count_adjustments(tx, &plan, item.created_at()).await?;
    tx.insert_item(item).await?;
    Ok(item.clone())
}

async fn reassign_in(
    tx: &mut (dyn StoreTransaction + '_),
    item_id: ItemId,
    target: Assignment,
    now: DateTime<Utc>,
) -> RepositoryResult<Item> {
    let mut item = lock_item(tx, item_id).await?;
    if item.assignment() == target {
        return Ok(item);
    }

    let plan = plan_assignment_change(item.assignment(), target, item.quantity());
    apply_count_adjustments(tx, &plan, now).await?;
    item.reassign(target, now);
    tx.update_item(&item).await?;
    Ok(item)
}

async fn update_quantity_in(
    tx: &mut (dyn StoreTransaction + '_),
    item_id: ItemId,
    quantity: i64,
    now: DateTime<Utc>,
) -> RepositoryResult<Item> {
    let mut item = lock_item(tx, item_id).await?;
    let plan = plan_quantity_change(item.assignment(), item.quantity(), quantity);
    item.set_quantity(quantity, now)?;
    apply_count_adjustments(tx, &plan, now).await?;
    tx.update_item(&item).await?;
    Ok(item)
}

async fn update_details_in(
    tx: &mut (dyn StoreTransaction + '_),
    item_id: ItemId,
    name: &ItemName,
    price: i64,
    now: DateTime<Utc>,
) -> RepositoryResult<Item> {
    let mut item = lock_item(tx, item_id).await?;
    item.set_details(name.clone(), price, now)?;
    tx.update_item(&item).await?;
    Ok(item)
}

async fn delete_in(
    tx: &mut (dyn StoreTransaction + '_),
    item_id: ItemId,
    now: DateTime<Utc>,
) -> RepositoryResult<Item> {
    let item = lock_item(tx, item_id).await?;
    let plan = plan_removal(item.assignment(), item.quantity());
    apply_count_adjustments(tx, &plan, now).await?;
    tx.delete_item(item_id).await?;
    Ok(item)
}
