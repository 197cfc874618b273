//! Entity storage.
//!
//! [EntityStore] is the persistence port: JSON records keyed by `(EntityKind, id)`.
//! [EntityStoreExt] layers typed access on top. [MemoryStore] is the in-process backend;
//! [StagedStore] buffers one block's writes and flushes them with a single bulk create.

use crate::entities::{Entity, EntityKind};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Durable keyed storage for indexed entities.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, StoreError>;

    /// Insert or overwrite one record.
    async fn save(&self, kind: EntityKind, id: &str, value: Value) -> Result<(), StoreError>;

    /// Insert or overwrite many records of one kind.
    async fn bulk_create(
        &self,
        kind: EntityKind,
        records: Vec<(String, Value)>,
    ) -> Result<(), StoreError>;

    /// All records of a kind, ordered by id.
    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, StoreError>;
}

/// Typed helpers over any [EntityStore].
#[async_trait]
pub trait EntityStoreExt {
    async fn load<T: Entity>(&self, id: &str) -> Result<Option<T>, StoreError>;
    async fn store<T: Entity>(&self, entity: &T) -> Result<(), StoreError>;
    async fn exists<T: Entity>(&self, id: &str) -> Result<bool, StoreError>;
    async fn load_all<T: Entity>(&self) -> Result<Vec<T>, StoreError>;
}

#[async_trait]
impl<S: EntityStore + ?Sized> EntityStoreExt for S {
    async fn load<T: Entity>(&self, id: &str) -> Result<Option<T>, StoreError> {
        match self.get(T::KIND, id).await? {
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| StoreError::Deserialize {
                    kind: T::KIND.as_str(),
                    id: id.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn store<T: Entity>(&self, entity: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(entity).map_err(|e| StoreError::Serialize {
            kind: T::KIND.as_str(),
            id: entity.id().to_string(),
            reason: e.to_string(),
        })?;
        self.save(T::KIND, entity.id(), value).await
    }

    async fn exists<T: Entity>(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.get(T::KIND, id).await?.is_some())
    }

    async fn load_all<T: Entity>(&self) -> Result<Vec<T>, StoreError> {
        self.list(T::KIND)
            .await?
            .into_iter()
            .map(|v| {
                serde_json::from_value(v).map_err(|e| StoreError::Deserialize {
                    kind: T::KIND.as_str(),
                    id: String::new(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

type Key = (EntityKind, String);

/// In-memory store. Records live for the lifetime of the process.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<Key, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records of `kind`.
    pub async fn count(&self, kind: EntityKind) -> usize {
        self.records
            .read()
            .await
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.records.read().await.get(&(kind, id.to_string())).cloned())
    }

    async fn save(&self, kind: EntityKind, id: &str, value: Value) -> Result<(), StoreError> {
        self.records.write().await.insert((kind, id.to_string()), value);
        Ok(())
    }

    async fn bulk_create(
        &self,
        kind: EntityKind,
        records: Vec<(String, Value)>,
    ) -> Result<(), StoreError> {
        let mut guard = self.records.write().await;
        for (id, value) in records {
            guard.insert((kind, id), value);
        }
        Ok(())
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .range((kind, String::new())..)
            .take_while(|((k, _), _)| *k == kind)
            .map(|(_, v)| v.clone())
            .collect())
    }
}

/// Write buffer for one block. Reads see staged writes first, then the inner store.
/// Nothing reaches the inner store until [StagedStore::commit].
pub struct StagedStore {
    inner: Arc<dyn EntityStore>,
    staged: Mutex<BTreeMap<Key, Value>>,
}

impl StagedStore {
    pub fn new(inner: Arc<dyn EntityStore>) -> Self {
        Self {
            inner,
            staged: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.staged.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.staged.lock().await.is_empty()
    }

    /// Flush staged writes, one bulk create per entity kind.
    pub async fn commit(self) -> Result<usize, StoreError> {
        let staged = self.staged.into_inner();
        let total = staged.len();
        let mut by_kind: BTreeMap<EntityKind, Vec<(String, Value)>> = BTreeMap::new();
        for ((kind, id), value) in staged {
            by_kind.entry(kind).or_default().push((id, value));
        }
        for (kind, records) in by_kind {
            self.inner.bulk_create(kind, records).await?;
        }
        Ok(total)
    }
}

#[async_trait]
impl EntityStore for StagedStore {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, StoreError> {
        if let Some(v) = self.staged.lock().await.get(&(kind, id.to_string())) {
            return Ok(Some(v.clone()));
        }
        self.inner.get(kind, id).await
    }

    async fn save(&self, kind: EntityKind, id: &str, value: Value) -> Result<(), StoreError> {
        self.staged.lock().await.insert((kind, id.to_string()), value);
        Ok(())
    }

    async fn bulk_create(
        &self,
        kind: EntityKind,
        records: Vec<(String, Value)>,
    ) -> Result<(), StoreError> {
        let mut guard = self.staged.lock().await;
        for (id, value) in records {
            guard.insert((kind, id), value);
        }
        Ok(())
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, StoreError> {
        let mut merged: BTreeMap<String, Value> = BTreeMap::new();
        for v in self.inner.list(kind).await? {
            let id = v.get("id").and_then(|i| i.as_str()).unwrap_or_default().to_string();
            merged.insert(id, v);
        }
        let guard = self.staged.lock().await;
        for ((k, id), v) in guard.iter() {
            if *k == kind {
                merged.insert(id.clone(), v.clone());
            }
        }
        Ok(merged.into_values().collect())
    }
}
