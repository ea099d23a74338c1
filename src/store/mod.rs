//! Document store abstraction.
//!
//! Everything the service persists lives in a document store: small JSON
//! documents addressed by `(collection, id)`. The [`DocumentStore`] trait is
//! the only seam the rest of the crate talks to, so the sequence counter, the
//! secret provisioner and the user service are all written against it and run
//! unchanged on the in-memory backend (development, tests) or on PostgreSQL.
//!
//! Cross-document correctness (unique ids, the singleton secret) is delegated
//! to the store. Nothing above this module keeps in-process locks.

pub mod memory;
pub mod postgres;
pub mod transaction;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;
pub use transaction::run_transaction;

/// Top-level fields of a document.
pub type Fields = Map<String, Value>;

/// Address of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    pub collection: String,
    pub id: String,
}

impl DocumentKey {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub key: DocumentKey,
    pub fields: Fields,
}

impl Document {
    pub fn new(key: DocumentKey, fields: Fields) -> Self {
        Self { key, fields }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Build a `MalformedDocument` error for this document
    pub fn malformed(&self, reason: impl Into<String>) -> StoreError {
        StoreError::MalformedDocument {
            key: self.key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors from any document store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document store unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction conflict on {0}")]
    Conflict(String),

    #[error("Transaction on {key} aborted after {attempts} attempts")]
    TransactionAborted { key: String, attempts: u32 },

    #[error("Malformed document {key}: {reason}")]
    MalformedDocument { key: String, reason: String },

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Key-value document backend.
///
/// Implementations must be safe to share between request handlers and must
/// provide atomicity per call: `create` is a true create-if-absent and a
/// committed [`Transaction`] applies all of its writes or none of them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read
    async fn get(&self, key: &DocumentKey) -> Result<Option<Document>, StoreError>;

    /// Create or replace the whole document
    async fn set(&self, key: &DocumentKey, fields: Fields) -> Result<(), StoreError>;

    /// Merge top-level fields into an existing document.
    /// Fails with `NotFound` when the document does not exist.
    async fn update(&self, key: &DocumentKey, partial: Fields) -> Result<(), StoreError>;

    /// Atomic create-if-absent. Returns `false` if the document already existed,
    /// in which case nothing is written.
    async fn create(&self, key: &DocumentKey, fields: Fields) -> Result<bool, StoreError>;

    /// Returns `true` if a document was removed
    async fn delete(&self, key: &DocumentKey) -> Result<bool, StoreError>;

    /// All documents of a collection, ordered by id
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Documents of a collection whose top-level `field` equals `value`, ordered by id
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError>;

    /// Cheap round trip used by `/health`
    async fn health(&self) -> Result<(), StoreError>;

    /// Start a read-modify-write unit of work
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}

/// A single atomic unit of work.
///
/// Reads observe the committed state; writes become visible only on
/// [`Transaction::commit`]. A commit that loses against a concurrent
/// transaction touching the same document fails with [`StoreError::Conflict`]
/// and leaves the store untouched. Dropping a transaction without committing
/// discards it.
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, key: &DocumentKey) -> Result<Option<Document>, StoreError>;

    async fn set(&mut self, key: &DocumentKey, fields: Fields) -> Result<(), StoreError>;

    async fn update(&mut self, key: &DocumentKey, partial: Fields) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Shorthand for building a `Fields` map from a `json!` object literal.
/// Non-object values yield an empty map.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}
