//! Slot inventory domain module.
//!
//! This crate contains the business rules for slots and items, implemented
//! purely as deterministic domain logic (no IO, no logging, no storage).

pub mod audit;
pub mod item;
pub mod plan;
pub mod slot;

pub use audit::{AuditReport, CountDiscrepancy, audit_counts};
pub use item::{Assignment, Item, ItemName};
pub use plan::{
    CountAdjustment, plan_assignment_change, plan_placement, plan_quantity_change, plan_removal,
    touched_slots, validate_plan,
};
pub use slot::{Slot, SlotCode};
