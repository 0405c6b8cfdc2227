use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use slotkeeper_core::{DomainError, DomainResult, Entity, SlotId, ValueObject};

/// Human-readable, unique slot label (e.g. `A-01`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotCode(String);

impl SlotCode {
    pub const MAX_LEN: usize = 32;

    /// Trim and validate a raw code.
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let code = raw.as_ref().trim();
        if code.is_empty() {
            return Err(DomainError::validation("slot code cannot be empty"));
        }
        if code.chars().count() > Self::MAX_LEN {
            return Err(DomainError::validation(format!(
                "slot code cannot exceed {} characters",
                Self::MAX_LEN
            )));
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for SlotCode {}

impl core::fmt::Display for SlotCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SlotCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SlotCode> for String {
    fn from(value: SlotCode) -> Self {
        value.0
    }
}

/// A capacity-bounded storage location.
///
/// `current_item_count` caches the sum of the quantities of the items assigned
/// to the slot. It only changes through [`Slot::apply_adjust`] and friends,
/// which keep it inside `[0, capacity]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    id: SlotId,
    code: SlotCode,
    capacity: i64,
    current_item_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Slot {
    /// Create a new, empty slot.
    pub fn new(id: SlotId, code: SlotCode, capacity: i64, now: DateTime<Utc>) -> DomainResult<Self> {
        if capacity < 0 {
            return Err(DomainError::InvalidCapacity(capacity));
        }
        Ok(Self {
            id,
            code,
            capacity,
            current_item_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuild a slot from persisted state. No validation is performed; storage
    /// constraints are trusted.
    pub fn restore(
        id: SlotId,
        code: SlotCode,
        capacity: i64,
        current_item_count: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            code,
            capacity,
            current_item_count,
            created_at,
            updated_at,
        }
    }

    pub fn id_typed(&self) -> SlotId {
        self.id
    }

    pub fn code(&self) -> &SlotCode {
        &self.code
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    pub fn current_item_count(&self) -> i64 {
        self.current_item_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn remaining_capacity(&self) -> i64 {
        self.capacity - self.current_item_count
    }

    /// Compute the count that applying `delta` would produce, without mutating.
    pub fn check_adjust(&self, delta: i64) -> DomainResult<i64> {
        let exceeded = || {
            DomainError::capacity_exceeded(self.id, self.capacity, self.current_item_count, delta)
        };
        let next = self.current_item_count.checked_add(delta).ok_or_else(exceeded)?;
        if next < 0 || next > self.capacity {
            return Err(exceeded());
        }
        Ok(next)
    }

    /// Apply `delta` to the cached count. On error the slot is untouched.
    pub fn apply_adjust(&mut self, delta: i64, now: DateTime<Utc>) -> DomainResult<()> {
        let next = self.check_adjust(delta)?;
        self.current_item_count = next;
        self.updated_at = now;
        Ok(())
    }

    /// Change the capacity. It may not drop below the current count.
    pub fn set_capacity(&mut self, capacity: i64, now: DateTime<Utc>) -> DomainResult<()> {
        if capacity < 0 {
            return Err(DomainError::InvalidCapacity(capacity));
        }
        if capacity < self.current_item_count {
            return Err(DomainError::capacity_exceeded(
                self.id,
                capacity,
                self.current_item_count,
                0,
            ));
        }
        self.capacity = capacity;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_code(&mut self, code: SlotCode, now: DateTime<Utc>) {
        self.code = code;
        self.updated_at = now;
    }

    /// Overwrite the count with a recomputed total (reconciliation).
    pub fn set_count(&mut self, count: i64, now: DateTime<Utc>) -> DomainResult<()> {
        if count < 0 || count > self.capacity {
            return Err(DomainError::capacity_exceeded(
                self.id,
                self.capacity,
                self.current_item_count,
                count - self.current_item_count,
            ));
        }
        self.current_item_count = count;
        self.updated_at = now;
        Ok(())
    }

    /// Zero the counter once every item has been detached.
    pub fn clear_count(&mut self, now: DateTime<Utc>) {
        self.current_item_count = 0;
        self.updated_at = now;
    }
}

impl Entity for Slot {
    type Id = SlotId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn slot(capacity: i64) -> Slot {
        Slot::new(SlotId::new(), SlotCode::parse("A-01").unwrap(), capacity, Utc::now()).unwrap()
    }

    #[test]
    fn code_is_trimmed() {
        let code = SlotCode::parse("  B-7 ").unwrap();
        assert_eq!(code.as_str(), "B-7");
    }

    #[test]
    fn code_rejects_blank_and_overlong() {
        assert!(matches!(SlotCode::parse("   "), Err(DomainError::Validation(_))));
        let long = "X".repeat(SlotCode::MAX_LEN + 1);
        assert!(matches!(SlotCode::parse(long), Err(DomainError::Validation(_))));
        assert!(SlotCode::parse("X".repeat(SlotCode::MAX_LEN)).is_ok());
    }

    #[test]
    fn new_slot_starts_empty() {
        let s = slot(10);
        assert_eq!(s.current_item_count(), 0);
        assert_eq!(s.remaining_capacity(), 10);
        assert_eq!(s.created_at(), s.updated_at());
    }

    #[test]
    fn negative_capacity_is_rejected() {
        let err = Slot::new(SlotId::new(), SlotCode::parse("A").unwrap(), -1, Utc::now()).unwrap_err();
        assert_eq!(err, DomainError::InvalidCapacity(-1));
    }

    #[test]
    fn zero_capacity_slot_accepts_zero_delta_only() {
        let mut s = slot(0);
        s.apply_adjust(0, Utc::now()).unwrap();
        assert!(matches!(
            s.apply_adjust(1, Utc::now()),
            Err(DomainError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn adjust_refreshes_updated_at() {
        let mut s = slot(10);
        let later = s.updated_at() + chrono::Duration::seconds(5);
        s.apply_adjust(4, later).unwrap();
        assert_eq!(s.current_item_count(), 4);
        assert_eq!(s.updated_at(), later);
    }

    #[test]
    fn adjust_past_capacity_leaves_slot_untouched() {
        let mut s = slot(5);
        s.apply_adjust(5, Utc::now()).unwrap();
        let before = s.clone();
        let err = s.apply_adjust(1, Utc::now()).unwrap_err();
        match err {
            DomainError::CapacityExceeded {
                capacity,
                current,
                delta,
                ..
            } => {
                assert_eq!((capacity, current, delta), (5, 5, 1));
            }
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
        assert_eq!(s, before);
    }

    #[test]
    fn adjust_below_zero_is_rejected() {
        let s = slot(5);
        assert!(matches!(s.check_adjust(-1), Err(DomainError::CapacityExceeded { .. })));
    }

    #[test]
    fn overflowing_delta_is_rejected() {
        let mut s = slot(i64::MAX);
        s.apply_adjust(10, Utc::now()).unwrap();
        assert!(s.check_adjust(i64::MAX).is_err());
    }

    #[test]
    fn capacity_cannot_shrink_below_count() {
        let mut s = slot(10);
        s.apply_adjust(6, Utc::now()).unwrap();
        assert!(matches!(
            s.set_capacity(5, Utc::now()),
            Err(DomainError::CapacityExceeded { .. })
        ));
        assert_eq!(s.set_capacity(-2, Utc::now()), Err(DomainError::InvalidCapacity(-2)));
        s.set_capacity(6, Utc::now()).unwrap();
        assert_eq!(s.remaining_capacity(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 500,
            ..ProptestConfig::default()
        })]

        /// Property: no sequence of adjustments leaves the count outside [0, capacity].
        #[test]
        fn adjustments_stay_within_bounds(
            capacity in 0i64..200,
            deltas in proptest::collection::vec(-50i64..50, 0..40)
        ) {
            let mut s = slot(capacity);
            for delta in deltas {
                let before = s.current_item_count();
                match s.apply_adjust(delta, Utc::now()) {
                    Ok(()) => prop_assert_eq!(s.current_item_count(), before + delta),
                    Err(_) => prop_assert_eq!(s.current_item_count(), before),
                }
                prop_assert!(s.current_item_count() >= 0);
                prop_assert!(s.current_item_count() <= s.capacity());
            }
        }
    }
}
