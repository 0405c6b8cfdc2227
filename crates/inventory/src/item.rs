use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use slotkeeper_core::{DomainError, DomainResult, Entity, ItemId, SlotId, ValueObject};

/// Display name of an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemName(String);

impl ItemName {
    pub const MAX_LEN: usize = 255;

    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let name = raw.as_ref().trim();
        if name.is_empty() {
            return Err(DomainError::validation("item name cannot be empty"));
        }
        if name.chars().count() > Self::MAX_LEN {
            return Err(DomainError::validation(format!(
                "item name cannot exceed {} characters",
                Self::MAX_LEN
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for ItemName {}

impl core::fmt::Display for ItemName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ItemName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ItemName> for String {
    fn from(value: ItemName) -> Self {
        value.0
    }
}

/// Assignment status of an item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Assignment {
    Unassigned,
    Assigned(SlotId),
}

impl Assignment {
    pub fn slot_id(self) -> Option<SlotId> {
        match self {
            Assignment::Unassigned => None,
            Assignment::Assigned(id) => Some(id),
        }
    }
}

impl From<Option<SlotId>> for Assignment {
    fn from(value: Option<SlotId>) -> Self {
        match value {
            Some(id) => Assignment::Assigned(id),
            None => Assignment::Unassigned,
        }
    }
}

/// A tracked good, optionally assigned to one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    id: ItemId,
    name: ItemName,
    /// Smallest currency unit.
    price: i64,
    quantity: i64,
    slot_id: Option<SlotId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn ensure_price(price: i64) -> DomainResult<()> {
    if price < 0 {
        return Err(DomainError::validation("price cannot be negative"));
    }
    Ok(())
}

fn ensure_quantity(quantity: i64) -> DomainResult<()> {
    if quantity < 0 {
        return Err(DomainError::validation("quantity cannot be negative"));
    }
    Ok(())
}

impl Item {
    pub fn new(
        id: ItemId,
        name: ItemName,
        price: i64,
        quantity: i64,
        slot_id: Option<SlotId>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        ensure_price(price)?;
        ensure_quantity(quantity)?;
        Ok(Self {
            id,
            name,
            price,
            quantity,
            slot_id,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuild an item from persisted state.
    pub fn restore(
        id: ItemId,
        name: ItemName,
        price: i64,
        quantity: i64,
        slot_id: Option<SlotId>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            price,
            quantity,
            slot_id,
            created_at,
            updated_at,
        }
    }

    pub fn id_typed(&self) -> ItemId {
        self.id
    }

    pub fn name(&self) -> &ItemName {
        &self.name
    }

    pub fn price(&self) -> i64 {
        self.price
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn slot_id(&self) -> Option<SlotId> {
        self.slot_id
    }

    pub fn assignment(&self) -> Assignment {
        self.slot_id.into()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Point the item at another slot (or none). Slot counters are the
    /// caller's responsibility; see [`crate::plan`].
    pub fn reassign(&mut self, target: Assignment, now: DateTime<Utc>) {
        self.slot_id = target.slot_id();
        self.updated_at = now;
    }

    /// Clear the slot reference after the slot itself went away.
    pub fn detach(&mut self, now: DateTime<Utc>) {
        self.reassign(Assignment::Unassigned, now);
    }

    pub fn set_quantity(&mut self, quantity: i64, now: DateTime<Utc>) -> DomainResult<()> {
        ensure_quantity(quantity)?;
        self.quantity = quantity;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_details(&mut self, name: ItemName, price: i64, now: DateTime<Utc>) -> DomainResult<()> {
        ensure_price(price)?;
        self.name = name;
        self.price = price;
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for Item {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
