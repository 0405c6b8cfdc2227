//! Repositories: the transactional write path for slots and items.
//!
//! Each public write runs as one unit of work: begin, lock, validate, write,
//! commit. Any error rolls the whole unit back. Units that lose a concurrency
//! race are retried according to the repository's [`RetryPolicy`].

mod items;
mod slots;

use std::sync::Arc;

pub use items::ItemRepository;
pub use slots::SlotRepository;

use crate::config::{ConfigError, InfraConfig};
use crate::error::RepositoryResult;
use crate::retry::RetryPolicy;
use crate::schema;
use crate::store::{InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, StoreTransaction};

/// Commit `tx` if `result` is `Ok`, otherwise roll it back and return the error.
pub(crate) async fn finish<T>(
    tx: Box<dyn StoreTransaction + '_>,
    result: RepositoryResult<T>,
) -> RepositoryResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::debug!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Both repositories over one shared store.
pub struct Inventory<S: ?Sized> {
    slots: SlotRepository<S>,
    items: ItemRepository<S>,
}

impl<S: ?Sized> Clone for Inventory<S> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            items: self.items.clone(),
        }
    }
}

impl<S> Inventory<S>
where
    S: InventoryStore + ?Sized,
{
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self {
            slots: SlotRepository::new(Arc::clone(&store)).with_retry(retry),
            items: ItemRepository::new(store).with_retry(retry),
        }
    }

    pub fn slots(&self) -> &SlotRepository<S> {
        &self.slots
    }

    pub fn items(&self) -> &ItemRepository<S> {
        &self.items
    }
}

impl Inventory<InMemoryInventoryStore> {
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryInventoryStore::new()), RetryPolicy::default())
    }
}

impl Inventory<dyn InventoryStore> {
    /// Postgres when `database_url` is set (schema applied on connect),
    /// otherwise a fresh in-memory store.
    pub async fn from_config(config: &InfraConfig) -> Result<Self, ConfigError> {
        if config.database_url.is_none() {
            return Ok(Self::new(Arc::new(InMemoryInventoryStore::new()), config.retry));
        }
        let pool = config.connect().await?;
        schema::apply(&pool).await?;
        Ok(Self::new(Arc::new(PostgresInventoryStore::new(pool)), config.retry))
    }
}
