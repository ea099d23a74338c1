use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::store::{fields, run_transaction, Document, DocumentKey, DocumentStore, StoreError};

pub const COUNTER_COLLECTION: &str = "Counters";
pub const USER_COUNTER_ID: &str = "user_counter";
const LAST_ID: &str = "last_id";

/// Hands out strictly increasing numeric ids backed by a counter document.
///
/// The counter holds no in-process state: every allocation is a transactional
/// read-modify-write of `{ "last_id": n }` in the store, so any number of
/// server instances sharing the store agree on the sequence. Gaps are possible
/// (an id allocated for a registration that later fails is not reused);
/// duplicates are not.
#[derive(Clone)]
pub struct SequenceCounter {
    store: Arc<dyn DocumentStore>,
    key: DocumentKey,
    attempts: u32,
}

impl SequenceCounter {
    pub fn new(store: Arc<dyn DocumentStore>, key: DocumentKey, attempts: u32) -> Self {
        Self { store, key, attempts }
    }

    /// Counter for numeric user ids (`Counters/user_counter`)
    pub fn for_users(store: Arc<dyn DocumentStore>, attempts: u32) -> Self {
        Self::new(store, DocumentKey::new(COUNTER_COLLECTION, USER_COUNTER_ID), attempts)
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub async fn allocate_next_id(&self) -> Result<u64, StoreError> {
        allocate_next_id(self.store.as_ref(), &self.key, self.attempts).await
    }
}

/// Allocate the next id from the counter document at `key`.
///
/// An absent counter starts the sequence at 1. Conflicting concurrent
/// allocations are retried from the read, up to `attempts` times.
pub async fn allocate_next_id(
    store: &dyn DocumentStore,
    key: &DocumentKey,
    attempts: u32,
) -> Result<u64, StoreError> {
    let new_id = run_transaction(store, key, attempts, |tx| {
        let key = key.clone();
        Box::pin(async move {
            match tx.get(&key).await? {
                Some(doc) => {
                    let new_id = read_last_id(&doc)?
                        .checked_add(1)
                        .ok_or_else(|| doc.malformed("last_id overflow"))?;
                    tx.update(&key, fields(json!({ LAST_ID: new_id }))).await?;
                    Ok::<_, StoreError>(new_id)
                }
                None => {
                    tx.set(&key, fields(json!({ LAST_ID: 1 }))).await?;
                    Ok(1)
                }
            }
        })
    })
    .await?;

    debug!(counter = %key, id = new_id, "allocated id");
    Ok(new_id)
}

fn read_last_id(doc: &Document) -> Result<u64, StoreError> {
    match doc.field(LAST_ID) {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| doc.malformed(format!("last_id is not a non-negative integer: {}", n))),
        Some(other) => Err(doc.malformed(format!("last_id is not an integer: {}", other))),
        None => Err(doc.malformed("missing last_id")),
    }
}
