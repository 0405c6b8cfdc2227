//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. A slot
/// code or an item name is a value object; a slot is an entity.
///
/// To "modify" a value object, construct a new one. Constructors are where
/// validation lives, so a value of the type is always well-formed.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
