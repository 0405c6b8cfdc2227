use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};

use slotkeeper_core::{DomainError, ItemId, SlotId};
use slotkeeper_inventory::{Item, Slot, SlotCode};

use super::{InventoryStore, StoreTransaction};
use crate::error::{RepositoryError, RepositoryResult};

#[derive(Debug, Clone, Default)]
struct Tables {
    slots: BTreeMap<SlotId, Slot>,
    items: BTreeMap<ItemId, Item>,
}

impl Tables {
    fn code_taken_by_other(&self, code: &SlotCode, id: SlotId) -> bool {
        self.slots
            .values()
            .any(|s| s.code() == code && s.id_typed() != id)
    }
}

/// In-memory slot/item store.
///
/// Intended for tests/dev. Writers are serialized by a single async mutex held
/// for the whole transaction; each transaction works on a private copy of the
/// tables that replaces the committed snapshot on commit. Readers clone the
/// committed snapshot handle and never wait for writers.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    writer: Mutex<()>,
    committed: RwLock<Arc<Tables>>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> RepositoryResult<Arc<Tables>> {
        self.committed
            .read()
            .map(|t| Arc::clone(&t))
            .map_err(|_| RepositoryError::storage("lock poisoned"))
    }

    fn publish(&self, tables: Tables) -> RepositoryResult<()> {
        let mut committed = self
            .committed
            .write()
            .map_err(|_| RepositoryError::storage("lock poisoned"))?;
        *committed = Arc::new(tables);
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn begin<'a>(&'a self) -> RepositoryResult<Box<dyn StoreTransaction + 'a>> {
        let guard = self.writer.lock().await;
        let working = Tables::clone(&*self.snapshot()?);
        Ok(Box::new(InMemoryTransaction {
            store: self,
            _guard: guard,
            working,
        }))
    }

    async fn get_slot(&self, id: SlotId) -> RepositoryResult<Option<Slot>> {
        Ok(self.snapshot()?.slots.get(&id).cloned())
    }

    async fn find_slot_by_code(&self, code: &SlotCode) -> RepositoryResult<Option<Slot>> {
        Ok(self
            .snapshot()?
            .slots
            .values()
            .find(|s| s.code() == code)
            .cloned())
    }

    async fn list_slots(&self) -> RepositoryResult<Vec<Slot>> {
        Ok(self.snapshot()?.slots.values().cloned().collect())
    }

    async fn get_item(&self, id: ItemId) -> RepositoryResult<Option<Item>> {
        Ok(self.snapshot()?.items.get(&id).cloned())
    }

    async fn list_items(&self) -> RepositoryResult<Vec<Item>> {
        Ok(self.snapshot()?.items.values().cloned().collect())
    }

    async fn items_in_slot(&self, slot_id: SlotId) -> RepositoryResult<Vec<Item>> {
        Ok(self
            .snapshot()?
            .items
            .values()
            .filter(|i| i.slot_id() == Some(slot_id))
            .cloned()
            .collect())
    }

    async fn unassigned_items(&self) -> RepositoryResult<Vec<Item>> {
        Ok(self
            .snapshot()?
            .items
            .values()
            .filter(|i| i.slot_id().is_none())
            .cloned()
            .collect())
    }
}

struct InMemoryTransaction<'a> {
    store: &'a InMemoryInventoryStore,
    _guard: MutexGuard<'a, ()>,
    working: Tables,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction<'_> {
    async fn use_snapshot(&mut self) -> RepositoryResult<()> {
        // The working copy is already a private snapshot.
        Ok(())
    }

    async fn lock_slots(&mut self, ids: &[SlotId]) -> RepositoryResult<Vec<Slot>> {
        // The writer mutex already excludes other transactions; only ordering
        // and deduplication are left to do.
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids
            .iter()
            .filter_map(|id| self.working.slots.get(id).cloned())
            .collect())
    }

    async fn lock_all_slots(&mut self) -> RepositoryResult<Vec<Slot>> {
        Ok(self.working.slots.values().cloned().collect())
    }

    async fn lock_item(&mut self, id: ItemId) -> RepositoryResult<Option<Item>> {
        Ok(self.working.items.get(&id).cloned())
    }

    async fn items(&mut self) -> RepositoryResult<Vec<Item>> {
        Ok(self.working.items.values().cloned().collect())
    }

    async fn insert_slot(&mut self, slot: &Slot) -> RepositoryResult<()> {
        let id = slot.id_typed();
        if self.working.slots.contains_key(&id) {
            return Err(RepositoryError::storage(format!("slot {id} already exists")));
        }
        if self.working.code_taken_by_other(slot.code(), id) {
            return Err(DomainError::duplicate_code(slot.code().as_str()).into());
        }
        self.working.slots.insert(id, slot.clone());
        Ok(())
    }

    async fn update_slot(&mut self, slot: &Slot) -> RepositoryResult<()> {
        let id = slot.id_typed();
        if !self.working.slots.contains_key(&id) {
            return Err(DomainError::SlotNotFound(id).into());
        }
        if self.working.code_taken_by_other(slot.code(), id) {
            return Err(DomainError::duplicate_code(slot.code().as_str()).into());
        }
        self.working.slots.insert(id, slot.clone());
        Ok(())
    }

    async fn delete_slot(&mut self, id: SlotId) -> RepositoryResult<()> {
        if self.working.slots.remove(&id).is_none() {
            return Err(DomainError::SlotNotFound(id).into());
        }
        let now = Utc::now();
        for item in self.working.items.values_mut() {
            if item.slot_id() == Some(id) {
                item.detach(now);
            }
        }
        Ok(())
    }

    async fn insert_item(&mut self, item: &Item) -> RepositoryResult<()> {
        let id = item.id_typed();
        if self.working.items.contains_key(&id) {
            return Err(RepositoryError::storage(format!("item {id} already exists")));
        }
        if let Some(slot_id) = item.slot_id() {
            if !self.working.slots.contains_key(&slot_id) {
                return Err(DomainError::SlotNotFound(slot_id).into());
            }
        }
        self.working.items.insert(id, item.clone());
        Ok(())
    }

    async fn update_item(&mut self, item: &Item) -> RepositoryResult<()> {
        let id = item.id_typed();
        if !self.working.items.contains_key(&id) {
            return Err(DomainError::ItemNotFound(id).into());
        }
        if let Some(slot_id) = item.slot_id() {
            if !self.working.slots.contains_key(&slot_id) {
                return Err(DomainError::SlotNotFound(slot_id).into());
            }
        }
        self.working.items.insert(id, item.clone());
        Ok(())
    }

    async fn delete_item(&mut self, id: ItemId) -> RepositoryResult<()> {
        self.working
            .items
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DomainError::ItemNotFound(id).into())
    }

    async fn detach_items(&mut self, slot_id: SlotId, now: DateTime<Utc>) -> RepositoryResult<Vec<ItemId>> {
        let mut detached = Vec::new();
        for item in self.working.items.values_mut() {
            if item.slot_id() == Some(slot_id) {
                item.detach(now);
                detached.push(item.id_typed());
            }
        }
        Ok(detached)
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        let this = *self;
        this.store.publish(this.working)
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotkeeper_inventory::ItemName;

    fn slot(code: &str, capacity: i64) -> Slot {
        Slot::new(SlotId::new(), SlotCode::parse(code).unwrap(), capacity, Utc::now()).unwrap()
    }

    fn item(slot_id: Option<SlotId>) -> Item {
        Item::new(
            ItemId::new(),
            ItemName::parse("crate").unwrap(),
            100,
            1,
            slot_id,
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_and_dropped() {
        let store = InMemoryInventoryStore::new();
        let s = slot("A", 5);

        let mut tx = store.begin().await.unwrap();
        tx.insert_slot(&s).await.unwrap();
        assert!(store.get_slot(s.id_typed()).await.unwrap().is_none());
        drop(tx);

        assert!(store.list_slots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_publishes_changes() {
        let store = InMemoryInventoryStore::new();
        let s = slot("A", 5);

        let mut tx = store.begin().await.unwrap();
        tx.insert_slot(&s).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get_slot(s.id_typed()).await.unwrap(), Some(s.clone()));
        assert_eq!(
            store.find_slot_by_code(s.code()).await.unwrap().map(|x| x.id_typed()),
            Some(s.id_typed())
        );
    }

    #[tokio::test]
    async fn duplicate_code_is_rejected() {
        let store = InMemoryInventoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_slot(&slot("A", 5)).await.unwrap();
        let err = tx.insert_slot(&slot("A", 9)).await.unwrap_err();
        assert_eq!(err, DomainError::duplicate_code("A").into());
    }

    #[tokio::test]
    async fn item_must_reference_existing_slot() {
        let store = InMemoryInventoryStore::new();
        let ghost = SlotId::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_item(&item(Some(ghost))).await.unwrap_err();
        assert_eq!(err, DomainError::SlotNotFound(ghost).into());
    }

    #[tokio::test]
    async fn deleting_a_slot_nulls_references() {
        let store = InMemoryInventoryStore::new();
        let s = slot("A", 5);
        let it = item(Some(s.id_typed()));

        let mut tx = store.begin().await.unwrap();
        tx.insert_slot(&s).await.unwrap();
        tx.insert_item(&it).await.unwrap();
        tx.delete_slot(s.id_typed()).await.unwrap();
        tx.commit().await.unwrap();

        let stored = store.get_item(it.id_typed()).await.unwrap().unwrap();
        assert_eq!(stored.slot_id(), None);
    }

    #[tokio::test]
    async fn lock_slots_sorts_and_skips_missing() {
        let store = InMemoryInventoryStore::new();
        let a = slot("A", 5);
        let b = slot("B", 5);

        let mut tx = store.begin().await.unwrap();
        tx.insert_slot(&a).await.unwrap();
        tx.insert_slot(&b).await.unwrap();

        let ghost = SlotId::new();
        let locked = tx
            .lock_slots(&[b.id_typed(), ghost, a.id_typed(), b.id_typed()])
            .await
            .unwrap();
        let mut expected = vec![a.id_typed(), b.id_typed()];
        expected.sort();
        let got: Vec<SlotId> = locked.iter().map(Slot::id_typed).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn readers_see_committed_state_while_writer_is_open() {
        let store = InMemoryInventoryStore::new();
        let s = slot("A", 5);
        let mut tx = store.begin().await.unwrap();
        tx.insert_slot(&s).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.delete_slot(s.id_typed()).await.unwrap();
        // Stale read: the open transaction is not visible yet.
        assert!(store.get_slot(s.id_typed()).await.unwrap().is_some());
        tx.rollback().await.unwrap();
        assert!(store.get_slot(s.id_typed()).await.unwrap().is_some());
    }
}
