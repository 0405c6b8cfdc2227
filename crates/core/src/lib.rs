//! Shared building blocks for the slot inventory: ids, errors, entity traits.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{ItemId, SlotId};
pub use value_object::ValueObject;
