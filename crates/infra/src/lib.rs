//! Infrastructure layer: storage, repositories, configuration.

pub mod config;
pub mod error;
pub mod repository;
pub mod retry;
pub mod schema;
pub mod store;

pub use config::{ConfigError, InfraConfig};
pub use error::{RepositoryError, RepositoryResult};
pub use repository::{Inventory, ItemRepository, SlotRepository};
pub use retry::RetryPolicy;
pub use store::{InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, StoreTransaction};
