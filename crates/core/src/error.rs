//! Domain error model.

use thiserror::Error;

use crate::id::{ItemId, SlotId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, missing records). Storage and concurrency failures belong to the
/// infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Another slot already uses this code.
    #[error("slot code already exists: {code}")]
    DuplicateCode { code: String },

    /// A slot capacity was negative.
    #[error("invalid capacity: {0}")]
    InvalidCapacity(i64),

    #[error("slot not found: {0}")]
    SlotNotFound(SlotId),

    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    /// Applying `delta` would move the slot count outside `[0, capacity]`.
    #[error(
        "capacity exceeded for slot {slot_id}: count {current} + delta {delta} outside [0, {capacity}]"
    )]
    CapacityExceeded {
        slot_id: SlotId,
        capacity: i64,
        current: i64,
        delta: i64,
    },

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn duplicate_code(code: impl Into<String>) -> Self {
        Self::DuplicateCode { code: code.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn capacity_exceeded(slot_id: SlotId, capacity: i64, current: i64, delta: i64) -> Self {
        Self::CapacityExceeded {
            slot_id,
            capacity,
            current,
            delta,
        }
    }

    /// True for the "record is missing" family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SlotNotFound(_) | Self::ItemNotFound(_))
    }
}
