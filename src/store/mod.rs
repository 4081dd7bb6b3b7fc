// Durable state store port. Backends are picked once at startup; nothing
// downstream of this trait knows which one it talks to.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::model::{Battery, EnergySource, House, Record};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait StateStore<E: Record>: Send + Sync {
    async fn find_all(&self) -> Result<Vec<E>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<E>, StoreError>;

    /// Insert or replace by id.
    async fn save(&self, entity: &E) -> Result<(), StoreError>;

    /// Returns true when a record was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// One store per collection, all on the configured backend.
pub struct Stores {
    pub houses: Arc<dyn StateStore<House>>,
    pub energy_sources: Arc<dyn StateStore<EnergySource>>,
    pub batteries: Arc<dyn StateStore<Battery>>,
}

impl Stores {
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        match config.backend {
            StoreBackend::Memory => Ok(Self {
                houses: Arc::new(MemoryStore::new()),
                energy_sources: Arc::new(MemoryStore::new()),
                batteries: Arc::new(MemoryStore::new()),
            }),
            StoreBackend::Sqlite => {
                let houses = SqliteStore::<House>::open(&config.path)?;
                let energy_sources = houses.share::<EnergySource>();
                let batteries = houses.share::<Battery>();
                Ok(Self {
                    houses: Arc::new(houses),
                    energy_sources: Arc::new(energy_sources),
                    batteries: Arc::new(batteries),
                })
            }
        }
    }
}
