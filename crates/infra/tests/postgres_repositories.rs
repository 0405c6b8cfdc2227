//! Repository behaviour against a real Postgres.
//!
//! Every test returns early when `DATABASE_URL` is unset. Slot codes carry a
//! fresh UUID so runs never collide with existing rows.

use std::sync::Arc;

use chrono::Utc;

use slotkeeper_core::{DomainError, SlotId};
use slotkeeper_infra::{
    InfraConfig, Inventory, InventoryStore, PostgresInventoryStore, RepositoryError, RetryPolicy,
    StoreTransaction, schema,
};
use slotkeeper_inventory::{Slot, SlotCode, audit_counts};

async fn store() -> Option<Arc<PostgresInventoryStore>> {
    let config = InfraConfig::from_env().unwrap();
    if config.database_url.is_none() {
        eprintln!("DATABASE_URL not set; skipping");
        return None;
    }
    let pool = config.connect().await.unwrap();
    schema::apply(&pool).await.unwrap();
    Some(Arc::new(PostgresInventoryStore::new(pool)))
}

async fn inventory_with(retry: RetryPolicy) -> Option<Inventory<PostgresInventoryStore>> {
    Some(Inventory::new(store().await?, retry))
}

async fn inventory() -> Option<Inventory<PostgresInventoryStore>> {
    inventory_with(RetryPolicy::new(10, std::time::Duration::from_millis(5))).await
}

fn code(prefix: &str) -> String {
    let unique = uuid::Uuid::now_v7().simple().to_string();
    format!("{prefix}-{}", &unique[unique.len() - 12..])
}

#[tokio::test]
async fn slot_lifecycle() {
    let Some(inv) = inventory().await else { return };
    let code = code("life");
    let slot = inv.slots().create(&code, 10).await.unwrap();

    let err = inv.slots().create(&code, 5).await.unwrap_err();
    assert_eq!(err, DomainError::duplicate_code(code.clone()).into());
    assert_eq!(inv.slots().get(slot.id_typed()).await.unwrap().capacity(), 10);

    let adjusted = inv.slots().adjust_count(slot.id_typed(), 4).await.unwrap();
    assert_eq!(adjusted.current_item_count(), 4);
    let err = inv.slots().adjust_count(slot.id_typed(), 7).await.unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Domain(DomainError::CapacityExceeded { .. })
    ));

    let found = inv.slots().find_by_code(&code).await.unwrap();
    assert_eq!(found.map(|s| s.id_typed()), Some(slot.id_typed()));

    // The raw adjustment has no items behind it; remove it so no drift is left.
    inv.slots().delete(slot.id_typed()).await.unwrap();
}

#[tokio::test]
async fn item_writes_keep_counts_in_step() {
    let Some(inv) = inventory().await else { return };
    let a = inv.slots().create(&code("a"), 10).await.unwrap().id_typed();
    let b = inv.slots().create(&code("b"), 3).await.unwrap().id_typed();

    let item = inv.items().create("bolt", 25, 4, Some(a)).await.unwrap();
    assert_eq!(inv.slots().get(a).await.unwrap().current_item_count(), 4);

    let err = inv.items().reassign(item.id_typed(), Some(b)).await.unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Domain(DomainError::CapacityExceeded { .. })
    ));
    assert_eq!(inv.items().get(item.id_typed()).await.unwrap().slot_id(), Some(a));
    assert_eq!(inv.slots().get(a).await.unwrap().current_item_count(), 4);
    assert_eq!(inv.slots().get(b).await.unwrap().current_item_count(), 0);

    inv.items().update_quantity(item.id_typed(), 2).await.unwrap();
    inv.items().reassign(item.id_typed(), Some(b)).await.unwrap();
    assert_eq!(inv.slots().get(a).await.unwrap().current_item_count(), 0);
    assert_eq!(inv.slots().get(b).await.unwrap().current_item_count(), 2);

    inv.items().delete(item.id_typed()).await.unwrap();
    assert_eq!(inv.slots().get(b).await.unwrap().current_item_count(), 0);
}

#[tokio::test]
async fn missing_slot_is_reported() {
    let Some(inv) = inventory().await else { return };
    let ghost = SlotId::new();
    let err = inv.items().create("bolt", 1, 1, Some(ghost)).await.unwrap_err();
    assert_eq!(err, DomainError::SlotNotFound(ghost).into());
}

#[tokio::test]
async fn deleting_a_slot_detaches_items() {
    let Some(inv) = inventory().await else { return };
    let slot = inv.slots().create(&code("del"), 10).await.unwrap().id_typed();
    let mut ids = Vec::new();
    for name in ["bolt", "nut", "washer"] {
        ids.push(inv.items().create(name, 1, 1, Some(slot)).await.unwrap().id_typed());
    }

    let mut detached = inv.slots().delete(slot).await.unwrap();
    detached.sort();
    ids.sort();
    assert_eq!(detached, ids);
    for id in ids {
        assert_eq!(inv.items().get(id).await.unwrap().slot_id(), None);
    }
    assert!(inv.slots().get(slot).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_adjustments_converge() {
    let Some(inv) = inventory().await else { return };
    let id = inv.slots().create(&code("conc"), 20).await.unwrap().id_typed();
    inv.slots().adjust_count(id, 10).await.unwrap();

    let up = inv.slots().clone();
    let down = inv.slots().clone();
    let a = tokio::spawn(async move { up.adjust_count(id, 5).await });
    let b = tokio::spawn(async move { down.adjust_count(id, -3).await });
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(inv.slots().get(id).await.unwrap().current_item_count(), 12);
    inv.slots().delete(id).await.unwrap();
}

#[tokio::test]
async fn audit_ignores_slots_created_after_it_started() {
    let Some(store) = store().await else { return };
    let inv = Inventory::new(Arc::clone(&store), RetryPolicy::default());

    // Other tests may update slots concurrently; a snapshot conflict is retryable.
    let (mut tx, slots) = loop {
        let mut tx = store.begin().await.unwrap();
        tx.use_snapshot().await.unwrap();
        match tx.lock_all_slots().await {
            Ok(slots) => break (tx, slots),
            Err(err) if err.is_retryable() => continue,
            Err(err) => panic!("lock_all_slots failed: {err}"),
        }
    };

    // Committed by other sessions while the audit holds its slot locks.
    let late_slot = inv.slots().create(&code("race"), 10).await.unwrap();
    let late_item = inv
        .items()
        .create("bolt", 1, 2, Some(late_slot.id_typed()))
        .await
        .unwrap();

    let items = tx.items().await.unwrap();
    tx.rollback().await.unwrap();
    let report = audit_counts(&slots, &items);
    assert!(!report.dangling_items.contains(&late_item.id_typed()));

    inv.items().delete(late_item.id_typed()).await.unwrap();
    inv.slots().delete(late_slot.id_typed()).await.unwrap();
}

#[tokio::test]
async fn count_check_violation_is_capacity_exceeded() {
    let Some(store) = store().await else { return };
    let inv = Inventory::new(Arc::clone(&store), RetryPolicy::default());
    let slot = inv.slots().create(&code("chk"), 1).await.unwrap();

    // Bypass the repositories so only the database constraint can object.
    let overfull = Slot::restore(
        slot.id_typed(),
        SlotCode::parse(slot.code().as_str()).unwrap(),
        1,
        5,
        slot.created_at(),
        Utc::now(),
    );
    let mut tx = store.begin().await.unwrap();
    let err = tx.update_slot(&overfull).await.unwrap_err();
    tx.rollback().await.unwrap();
    assert!(matches!(
        err,
        RepositoryError::Domain(DomainError::CapacityExceeded { .. })
    ));

    assert_eq!(inv.slots().get(slot.id_typed()).await.unwrap().current_item_count(), 0);
    inv.slots().delete(slot.id_typed()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn opposite_reassigns_do_not_deadlock() {
    let Some(inv) = inventory_with(RetryPolicy::none()).await else { return };
    let a = inv.slots().create(&code("fwd"), 20).await.unwrap().id_typed();
    let b = inv.slots().create(&code("rev"), 20).await.unwrap().id_typed();

    let mut in_a = Vec::new();
    let mut in_b = Vec::new();
    for _ in 0..10 {
        in_a.push(inv.items().create("bolt", 1, 1, Some(a)).await.unwrap().id_typed());
        in_b.push(inv.items().create("nut", 1, 1, Some(b)).await.unwrap().id_typed());
    }

    let mut handles = Vec::new();
    for (id, target) in in_a.iter().map(|id| (*id, b)).chain(in_b.iter().map(|id| (*id, a))) {
        let items = inv.items().clone();
        handles.push(tokio::spawn(async move { items.reassign(id, Some(target)).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(inv.slots().get(a).await.unwrap().current_item_count(), 10);
    assert_eq!(inv.slots().get(b).await.unwrap().current_item_count(), 10);
    for id in in_a {
        assert_eq!(inv.items().get(id).await.unwrap().slot_id(), Some(b));
    }

    inv.slots().delete(a).await.unwrap();
    inv.slots().delete(b).await.unwrap();
}
