//! Count adjustment planning for item mutations.
//!
//! Every item write translates into a small set of per-slot deltas. Computing
//! them here keeps the repositories free of arithmetic: they lock the slots the
//! plan touches, validate it, then apply it inside one unit of work.

use slotkeeper_core::{DomainError, DomainResult, SlotId};

use crate::item::Assignment;
use crate::slot::Slot;

/// A delta to apply to one slot's `current_item_count`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CountAdjustment {
    pub slot_id: SlotId,
    pub delta: i64,
}

/// Placing a new item with `quantity` into `target`.
pub fn plan_placement(target: Assignment, quantity: i64) -> Vec<CountAdjustment> {
    target
        .slot_id()
        .map(|slot_id| CountAdjustment {
            slot_id,
            delta: quantity,
        })
        .into_iter()
        .collect()
}

/// Removing an item with `quantity` from wherever it sits.
pub fn plan_removal(current: Assignment, quantity: i64) -> Vec<CountAdjustment> {
    current
        .slot_id()
        .map(|slot_id| CountAdjustment {
            slot_id,
            delta: -quantity,
        })
        .into_iter()
        .collect()
}

/// Moving an item from `from` to `to`.
///
/// The target entry is kept even for zero quantities so the target slot is
/// still locked and checked for existence. Moving to the same slot plans
/// nothing.
pub fn plan_assignment_change(from: Assignment, to: Assignment, quantity: i64) -> Vec<CountAdjustment> {
    if from == to {
        return Vec::new();
    }
    let mut plan = plan_removal(from, quantity);
    plan.extend(plan_placement(to, quantity));
    plan
}

/// Changing the quantity of an item that stays where it is.
pub fn plan_quantity_change(current: Assignment, old_quantity: i64, new_quantity: i64) -> Vec<CountAdjustment> {
    let delta = new_quantity - old_quantity;
    match current.slot_id() {
        Some(slot_id) if delta != 0 => vec![CountAdjustment { slot_id, delta }],
        _ => Vec::new(),
    }
}

/// Slots a plan touches, sorted ascending and deduplicated (lock order).
pub fn touched_slots(plan: &[CountAdjustment]) -> Vec<SlotId> {
    let mut ids: Vec<SlotId> = plan.iter().map(|a| a.slot_id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Check every adjustment against the (locked) slot state.
///
/// Fails with `SlotNotFound` for a slot missing from `slots` and with
/// `CapacityExceeded` for the first adjustment the slot rejects.
pub fn validate_plan(plan: &[CountAdjustment], slots: &[Slot]) -> DomainResult<()> {
    for adj in plan {
        let slot = slots
            .iter()
            .find(|s| s.id_typed() == adj.slot_id)
            .ok_or(DomainError::SlotNotFound(adj.slot_id))?;
        slot.check_adjust(adj.delta)?;
    }
    Ok(())
}
