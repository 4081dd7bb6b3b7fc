use super::StateStore;
use crate::error::StoreError;
use crate::model::Record;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// In-process store backed by a concurrent map. Used for local runs and tests.
pub struct MemoryStore<E: Record> {
    records: Arc<DashMap<String, E>>,
}

impl<E: Record> MemoryStore<E> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<E: Record> Default for MemoryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Record> StateStore<E> for MemoryStore<E> {
    async fn find_all(&self) -> Result<Vec<E>, StoreError> {
        let mut all: Vec<E> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(all)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<E>, StoreError> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn save(&self, entity: &E) -> Result<(), StoreError> {
        self.records.insert(entity.id().to_string(), entity.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(id).is_some())
    }
}
