//! Invariant audit: recompute slot counts from item rows.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use slotkeeper_core::{Entity, ItemId, SlotId};

use crate::item::Item;
use crate::slot::Slot;

/// A slot whose cached count disagrees with its items.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountDiscrepancy {
    pub slot_id: SlotId,
    pub recorded: i64,
    pub actual: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub discrepancies: Vec<CountDiscrepancy>,
    /// Items whose `slot_id` names a slot that does not exist.
    pub dangling_items: Vec<ItemId>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty() && self.dangling_items.is_empty()
    }
}

/// Compare each slot's `current_item_count` with the sum of its items' quantities.
///
/// Output is ordered by slot id and item id.
pub fn audit_counts(slots: &[Slot], items: &[Item]) -> AuditReport {
    let known: BTreeSet<SlotId> = slots.iter().map(|s| *s.id()).collect();

    let mut totals: BTreeMap<SlotId, i64> = BTreeMap::new();
    let mut dangling_items = Vec::new();
    for item in items {
        let Some(slot_id) = item.slot_id() else {
            continue;
        };
        if known.contains(&slot_id) {
            *totals.entry(slot_id).or_default() += item.quantity();
        } else {
            dangling_items.push(item.id_typed());
        }
    }
    dangling_items.sort_unstable();

    let mut discrepancies: Vec<CountDiscrepancy> = slots
        .iter()
        .filter_map(|slot| {
            let actual = totals.get(&slot.id_typed()).copied().unwrap_or(0);
            (actual != slot.current_item_count()).then(|| CountDiscrepancy {
                slot_id: slot.id_typed(),
                recorded: slot.current_item_count(),
                actual,
            })
        })
        .collect();
    discrepancies.sort_unstable_by_key(|d| d.slot_id);

    AuditReport {
        discrepancies,
        dangling_items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemName;
    use crate::slot::SlotCode;
    use chrono::Utc;

    fn slot(count: i64) -> Slot {
        let now = Utc::now();
        Slot::restore(SlotId::new(), SlotCode::parse("A").unwrap(), 100, count, now, now)
    }

    fn item(quantity: i64, slot_id: Option<SlotId>) -> Item {
        Item::new(
            ItemId::new(),
            ItemName::parse("thing").unwrap(),
            1,
            quantity,
            slot_id,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn consistent_state_reports_nothing() {
        let s = slot(7);
        let items = vec![
            item(3, Some(s.id_typed())),
            item(4, Some(s.id_typed())),
            item(9, None),
        ];
        assert!(audit_counts(&[s], &items).is_consistent());
    }

    #[test]
    fn drifted_count_is_reported() {
        let s = slot(2);
        let items = vec![item(5, Some(s.id_typed()))];
        let report = audit_counts(std::slice::from_ref(&s), &items);
        assert_eq!(
            report.discrepancies,
            vec![CountDiscrepancy {
                slot_id: s.id_typed(),
                recorded: 2,
                actual: 5,
            }]
        );
    }

    #[test]
    fn empty_slot_with_stale_count_is_reported() {
        let s = slot(4);
        let report = audit_counts(std::slice::from_ref(&s), &[]);
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].actual, 0);
    }

    #[test]
    fn dangling_reference_is_reported() {
        let orphan = item(1, Some(SlotId::new()));
        let report = audit_counts(&[], std::slice::from_ref(&orphan));
        assert_eq!(report.dangling_items, vec![orphan.id_typed()]);
        assert!(!report.is_consistent());
    }
}
