use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Document, DocumentKey, DocumentStore, Fields, StoreError, Transaction};

#[derive(Debug, Clone)]
struct Slot {
    /// Store-wide clock value of the last write. Never reused, so a document
    /// that is deleted and recreated cannot look unchanged to a transaction.
    revision: u64,
    /// Number of writes since the document was created
    writes: u64,
    fields: Fields,
}

#[derive(Debug, Default)]
struct State {
    documents: BTreeMap<DocumentKey, Slot>,
    clock: u64,
}

impl State {
    fn revision(&self, key: &DocumentKey) -> Option<u64> {
        self.documents.get(key).map(|slot| slot.revision)
    }

    fn put(&mut self, key: DocumentKey, fields: Fields) {
        self.clock += 1;
        let revision = self.clock;
        let writes = self.documents.get(&key).map_or(0, |slot| slot.writes) + 1;
        self.documents.insert(key, Slot { revision, writes, fields });
    }

    fn document(&self, key: &DocumentKey) -> Option<Document> {
        self.documents
            .get(key)
            .map(|slot| Document::new(key.clone(), slot.fields.clone()))
    }
}

/// Process-local document store with optimistic transactions.
///
/// Every write stamps the document with a fresh revision. A transaction
/// remembers the revision of each document it read and its commit is rejected
/// with [`StoreError::Conflict`] if any of them moved in the meantime.
/// Cloning shares the underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the document was written since it was created (0 if absent)
    pub async fn write_count(&self, key: &DocumentKey) -> u64 {
        let state = self.state.read().await;
        state.documents.get(key).map_or(0, |slot| slot.writes)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &DocumentKey) -> Result<Option<Document>, StoreError> {
        Ok(self.state.read().await.document(key))
    }

    async fn set(&self, key: &DocumentKey, fields: Fields) -> Result<(), StoreError> {
        self.state.write().await.put(key.clone(), fields);
        Ok(())
    }

    async fn update(&self, key: &DocumentKey, partial: Fields) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let mut merged = state
            .documents
            .get(key)
            .map(|slot| slot.fields.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        merged.extend(partial);
        state.put(key.clone(), merged);
        Ok(())
    }

    async fn create(&self, key: &DocumentKey, fields: Fields) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.documents.contains_key(key) {
            return Ok(false);
        }
        state.put(key.clone(), fields);
        Ok(true)
    }

    async fn delete(&self, key: &DocumentKey) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.documents.remove(key).is_some())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .iter()
            .filter(|(key, _)| key.collection == collection)
            .map(|(key, slot)| Document::new(key.clone(), slot.fields.clone()))
            .collect())
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .iter()
            .filter(|(key, slot)| key.collection == collection && slot.fields.get(field) == Some(value))
            .map(|(key, slot)| Document::new(key.clone(), slot.fields.clone()))
            .collect())
    }

    async fn health(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            reads: HashMap::new(),
            writes: Vec::new(),
        }))
    }
}

#[derive(Debug)]
enum Write {
    Set(Fields),
    Update(Fields),
}

struct MemoryTransaction {
    state: Arc<RwLock<State>>,
    /// Revision observed by the first read of each key (`None` = absent)
    reads: HashMap<DocumentKey, Option<u64>>,
    writes: Vec<(DocumentKey, Write)>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, key: &DocumentKey) -> Result<Option<Document>, StoreError> {
        let state = self.state.read().await;
        self.reads
            .entry(key.clone())
            .or_insert_with(|| state.revision(key));

        let mut current = state.document(key).map(|doc| doc.fields);
        drop(state);

        // Read-your-writes within the transaction
        for (written, write) in &self.writes {
            if written != key {
                continue;
            }
            current = match write {
                Write::Set(fields) => Some(fields.clone()),
                Write::Update(partial) => current.map(|mut base| {
                    base.extend(partial.clone());
                    base
                }),
            };
        }

        Ok(current.map(|fields| Document::new(key.clone(), fields)))
    }

    async fn set(&mut self, key: &DocumentKey, fields: Fields) -> Result<(), StoreError> {
        self.writes.push((key.clone(), Write::Set(fields)));
        Ok(())
    }

    async fn update(&mut self, key: &DocumentKey, partial: Fields) -> Result<(), StoreError> {
        self.writes.push((key.clone(), Write::Update(partial)));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { state, reads, writes } = *self;
        let mut state = state.write().await;

        for (key, observed) in &reads {
            if state.revision(key) != *observed {
                return Err(StoreError::Conflict(key.to_string()));
            }
        }

        // Stage everything first so a failing update leaves the store untouched
        let mut staged: BTreeMap<DocumentKey, Fields> = BTreeMap::new();
        for (key, write) in writes {
            let current = staged
                .get(&key)
                .cloned()
                .or_else(|| state.documents.get(&key).map(|slot| slot.fields.clone()));
            let next = match write {
                Write::Set(fields) => fields,
                Write::Update(partial) => {
                    let mut base = current.ok_or_else(|| StoreError::NotFound(key.to_string()))?;
                    base.extend(partial);
                    base
                }
            };
            staged.insert(key, next);
        }

        for (key, fields) in staged {
            state.put(key, fields);
        }
        Ok(())
    }
}
