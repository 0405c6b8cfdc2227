use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use slotkeeper_core::{DomainError, ItemId, SlotId};
use slotkeeper_inventory::{
    AuditReport, CountAdjustment, Item, Slot, SlotCode, audit_counts, touched_slots, validate_plan,
};

use super::finish;
use crate::error::RepositoryResult;
use crate::retry::RetryPolicy;
use crate::store::{InventoryStore, StoreTransaction};

/// Lock the slots a plan touches (ascending id order), validate the plan
/// against them, apply it and write the slots back.
///
/// Returns the updated slots in lock order. On error nothing has been written
/// through `tx` by this function.
pub(crate) async fn apply_count_adjustments(
    tx: &mut (dyn StoreTransaction + '_),
    plan: &[CountAdjustment],
    now: DateTime<Utc>,
) -> RepositoryResult<Vec<Slot>> {
    if plan.is_empty() {
        return Ok(vec![]);
    }

    let mut slots = tx.lock_slots(&touched_slots(plan)).await?;
    validate_plan(plan, &slots)?;

    for adj in plan {
        let slot = slots
            .iter_mut()
            .find(|s| s.id_typed() == adj.slot_id)
            .ok_or(DomainError::SlotNotFound(adj.slot_id))?;
        slot.apply_adjust(adj.delta, now)?;
    }
    for slot in &slots {
        tx.update_slot(slot).await?;
    }
    Ok(slots)
}

async fn lock_one(tx: &mut (dyn StoreTransaction + '_), slot_id: SlotId) -> RepositoryResult<Slot> {
    tx.lock_slots(&[slot_id])
        .await?
        .pop()
        .ok_or_else(|| DomainError::SlotNotFound(slot_id).into())
}

/// Slot repository: the only write path for slot rows and their counters.
pub struct SlotRepository<S: ?Sized> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: ?Sized> Clone for SlotRepository<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retry: self.retry,
        }
    }
}

impl<S> SlotRepository<S>
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

    /// Create an empty slot. Fails with `DuplicateCode` if the code is taken
    /// and `InvalidCapacity` for a negative capacity.
    #[instrument(level = "debug", skip(self))]
    pub async fn create(&self, code: &str, capacity: i64) -> RepositoryResult<Slot> {
        let code = SlotCode::parse(code)?;
        let slot = Slot::new(SlotId::new(), code, capacity, Utc::now())?;
        let slot = &slot;
        self.retry
            .run("slot.create", move || self.try_create(slot))
            .await
    }

    async fn try_create(&self, slot: &Slot) -> RepositoryResult<Slot> {
        let mut tx = self.store.begin().await?;
        let result = tx.insert_slot(slot).await.map(|()| slot.clone());
        finish(tx, result).await
    }

    /// Apply `delta` to the slot's `current_item_count`.
    ///
    /// Fails with `CapacityExceeded` if the result would leave `[0, capacity]`.
    #[instrument(level = "debug", skip(self))]
    pub async fn adjust_count(&self, slot_id: SlotId, delta: i64) -> RepositoryResult<Slot> {
        self.retry
            .run("slot.adjust_count", move || self.try_adjust_count(slot_id, delta))
            .await
    }

    async fn try_adjust_count(&self, slot_id: SlotId, delta: i64) -> RepositoryResult<Slot> {
        let mut tx = self.store.begin().await?;
        let plan = [CountAdjustment { slot_id, delta }];
        let result = apply_count_adjustments(tx.as_mut(), &plan, Utc::now())
            .await
            .and_then(|mut slots| {
                slots
                    .pop()
                    .ok_or_else(|| DomainError::SlotNotFound(slot_id).into())
            });
        finish(tx, result).await
    }

    /// Detach every item in the slot, then remove the slot. Returns the ids of
    /// the detached items.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete(&self, slot_id: SlotId) -> RepositoryResult<Vec<ItemId>> {
        self.retry
            .run("slot.delete", move || self.try_delete(slot_id))
            .await
    }

    async fn try_delete(&self, slot_id: SlotId) -> RepositoryResult<Vec<ItemId>> {
        let mut tx = self.store.begin().await?;
        let result = delete_in(tx.as_mut(), slot_id, Utc::now()).await;
        finish(tx, result).await
    }

    /// Rename a slot. The new code must be unique.
    #[instrument(level = "debug", skip(self))]
    pub async fn update_code(&self, slot_id: SlotId, code: &str) -> RepositoryResult<Slot> {
        let code = SlotCode::parse(code)?;
        let code = &code;
        self.retry
            .run("slot.update_code", move || self.try_update_code(slot_id, code))
            .await
    }

    async fn try_update_code(&self, slot_id: SlotId, code: &SlotCode) -> RepositoryResult<Slot> {
        let mut tx = self.store.begin().await?;
        let result = update_code_in(tx.as_mut(), slot_id, code, Utc::now()).await;
        finish(tx, result).await
    }

    /// Change a slot's capacity. It may not drop below the current count.
    #[instrument(level = "debug", skip(self))]
    pub async fn update_capacity(&self, slot_id: SlotId, capacity: i64) -> RepositoryResult<Slot> {
        if capacity < 0 {
            return Err(DomainError::InvalidCapacity(capacity).into());
        }
        self.retry
            .run("slot.update_capacity", move || {
                self.try_update_capacity(slot_id, capacity)
            })
            .await
    }

    async fn try_update_capacity(&self, slot_id: SlotId, capacity: i64) -> RepositoryResult<Slot> {
        let mut tx = self.store.begin().await?;
        let result = update_capacity_in(tx.as_mut(), slot_id, capacity, Utc::now()).await;
        finish(tx, result).await
    }

    pub async fn get(&self, slot_id: SlotId) -> RepositoryResult<Slot> {
        self.store
            .get_slot(slot_id)
            .await?
            .ok_or_else(|| DomainError::SlotNotFound(slot_id).into())
    }

    pub async fn find_by_code(&self, code: &str) -> RepositoryResult<Option<Slot>> {
        let code = SlotCode::parse(code)?;
        self.store.find_slot_by_code(&code).await
    }

    pub async fn list(&self) -> RepositoryResult<Vec<Slot>> {
        self.store.list_slots().await
    }

    /// Items currently assigned to the slot.
    pub async fn items_in_slot(&self, slot_id: SlotId) -> RepositoryResult<Vec<Item>> {
        self.store.items_in_slot(slot_id).await
    }

    /// Recompute every slot's count from its items and report drift.
    ///
    /// Runs inside a snapshot transaction holding every slot lock, so slots
    /// and items are read consistently; nothing is written.
    #[instrument(level = "debug", skip(self))]
    pub async fn verify_counts(&self) -> RepositoryResult<AuditReport> {
        self.retry
            .run("slot.verify_counts", move || self.try_audit(false))
            .await
    }

    /// Like [`verify_counts`](Self::verify_counts), then overwrite every
    /// drifted counter with the recomputed value. Returns the drift that was
    /// found. Fails with `CapacityExceeded` (and writes nothing) if a
    /// recomputed value does not fit its slot.
    #[instrument(level = "debug", skip(self))]
    pub async fn reconcile_counts(&self) -> RepositoryResult<AuditReport> {
        self.retry
            .run("slot.reconcile_counts", move || self.try_audit(true))
            .await
    }

    async fn try_audit(&self, repair: bool) -> RepositoryResult<AuditReport> {
        let mut tx = self.store.begin().await?;
        let result = audit_in(tx.as_mut(), repair, Utc::now()).await;

        if repair {
            finish(tx, result).await
        } else {
            // Read-only: release the locks without writing.
            if let Err(err) = tx.rollback().await {
                tracing::debug!(error = %err, "rollback of read-only audit failed");
            }
            result
        }
    }
}

async fn delete_in(
    tx: &mut (dyn StoreTransaction + '_),
    slot_id: SlotId,
    now: DateTime<Utc>,
) -> RepositoryResult<Vec<ItemId>> {
    let mut slot = lock_one(tx, slot_id).await?;
    let detached = tx.detach_items(slot_id, now).await?;
    slot.clear_count(now);
    tx.update_slot(&slot).await?;
    tx.delete_slot(slot_id).await?;
    Ok(detached)
}

async fn update_code_in(
    tx: &mut (dyn StoreTransaction + '_),
    slot_id: SlotId,
    code: &SlotCode,
    now: DateTime<Utc>,
) -> RepositoryResult<Slot> {
    let mut slot = lock_one(tx, slot_id).await?;
    slot.set_code(code.clone(), now);
    tx.update_slot(&slot).await?;
    Ok(slot)
}

async fn update_capacity_in(
    tx: &mut (dyn StoreTransaction + '_),
    slot_id: SlotId,
    capacity: i64,
    now: DateTime<Utc>,
) -> RepositoryResult<Slot> {
    let mut slot = lock_one(tx, slot_id).await?;
    slot.set_capacity(capacity, now)?;
    tx.update_slot(&slot).await?;
    Ok(slot)
}

async fn audit_in(
    tx: &mut (dyn StoreTransaction + '_),
    repair: bool,
    now: DateTime<Utc>,
) -> RepositoryResult<AuditReport> {
    // Slots created after the lock must not show up as dangling item targets.
    tx.use_snapshot().await?;
    let slots = tx.lock_all_slots().await?;
    let items = tx.items().await?;
    let report = audit_counts(&slots, &items);
    if !repair {
        return Ok(report);
    }

    for drift in &report.discrepancies {
        let Some(slot) = slots.iter().find(|s| s.id_typed() == drift.slot_id) else {
            continue;
        };
        let mut slot = slot.clone();
        slot.set_count(drift.actual, now)?;
        tx.update_slot(&slot).await?;
    }
    Ok(report)
}
