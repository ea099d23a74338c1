use std::sync::Arc;

use rand::{rngs::OsRng, RngCore};
use serde_json::{json, Value};
use tracing::info;

use crate::store::{fields, Document, DocumentKey, DocumentStore, StoreError};

pub const SECRET_COLLECTION: &str = "Key";
pub const ADMIN_SECRET_ID: &str = "secret";
const VALUE: &str = "value";

/// Random bytes per token; hex encoding doubles the length
pub const TOKEN_BYTES: usize = 16;

/// Guarantees a single durable secret and returns it idempotently.
///
/// The first caller that finds the document absent generates a token and
/// publishes it with the store's create-if-absent primitive. A caller that
/// loses that race adopts the winner's value, so concurrent first startups
/// all end up with the same token and it is never overwritten.
#[derive(Clone)]
pub struct SecretProvisioner {
    store: Arc<dyn DocumentStore>,
    key: DocumentKey,
}

impl SecretProvisioner {
    pub fn new(store: Arc<dyn DocumentStore>, key: DocumentKey) -> Self {
        Self { store, key }
    }

    /// Provisioner for the admin console key (`Key/secret`)
    pub fn for_admin(store: Arc<dyn DocumentStore>) -> Self {
        Self::new(store, DocumentKey::new(SECRET_COLLECTION, ADMIN_SECRET_ID))
    }

    pub async fn ensure_secret(&self) -> Result<String, StoreError> {
        ensure_secret(self.store.as_ref(), &self.key).await
    }

    /// The stored secret, without creating one
    pub async fn current(&self) -> Result<Option<String>, StoreError> {
        match self.store.get(&self.key).await? {
            Some(doc) => read_value(&doc).map(Some),
            None => Ok(None),
        }
    }
}

/// Return the secret stored at `key`, creating it on first use.
pub async fn ensure_secret(store: &dyn DocumentStore, key: &DocumentKey) -> Result<String, StoreError> {
    if let Some(doc) = store.get(key).await? {
        return read_value(&doc);
    }

    let token = generate_token();
    if store.create(key, fields(json!({ VALUE: token }))).await? {
        info!(secret = %key, "Generated new secret key: {}", token);
        return Ok(token);
    }

    // Someone else created it between our read and our create
    let doc = store
        .get(key)
        .await?
        .ok_or_else(|| StoreError::Backend(format!("{} vanished after concurrent creation", key)))?;
    read_value(&doc)
}

/// Hex-encoded token from the operating system's CSPRNG
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn read_value(doc: &Document) -> Result<String, StoreError> {
    match doc.field(VALUE) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value.clone()),
        Some(Value::String(_)) => Err(doc.malformed("value is empty")),
        Some(other) => Err(doc.malformed(format!("value is not a string: {}", other))),
        None => Err(doc.malformed("missing value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Fields, MemoryStore, Transaction};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn secret_key() -> DocumentKey {
        DocumentKey::new(SECRET_COLLECTION, ADMIN_SECRET_ID)
    }

    #[test]
    fn tokens_are_hex_of_fixed_length() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[tokio::test]
    async fn repeated_calls_return_the_same_secret() {
        let store = MemoryStore::new();
        let provisioner = SecretProvisioner::for_admin(Arc::new(store.clone()));

        let first = provisioner.ensure_secret().await.unwrap();
        let second = provisioner.ensure_secret().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.write_count(&secret_key()).await, 1);
        assert_eq!(provisioner.current().await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn existing_secret_is_returned_unchanged() {
        let store = MemoryStore::new();
        store
            .set(&secret_key(), fields(json!({"value": "abc123"})))
            .await
            .unwrap();
        let provisioner = SecretProvisioner::for_admin(Arc::new(store.clone()));

        assert_eq!(provisioner.ensure_secret().await.unwrap(), "abc123");
        assert_eq!(store.write_count(&secret_key()).await, 1);
    }

    #[tokio::test]
    async fn current_is_none_before_provisioning() {
        let provisioner = SecretProvisioner::for_admin(Arc::new(MemoryStore::new()));
        assert_eq!(provisioner.current().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_agree_on_one_secret() {
        let store = MemoryStore::new();
        let provisioner = SecretProvisioner::for_admin(Arc::new(store.clone()));

        let handles: Vec<_> = (0..24)
            .map(|_| {
                let provisioner = provisioner.clone();
                tokio::spawn(async move { provisioner.ensure_secret().await })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            seen.insert(handle.await.unwrap().unwrap());
        }

        assert_eq!(seen.len(), 1);
        assert_eq!(store.write_count(&secret_key()).await, 1);
        let stored = provisioner.current().await.unwrap().unwrap();
        assert!(seen.contains(&stored));
    }

    #[tokio::test]
    async fn malformed_secret_is_an_error() {
        let store = MemoryStore::new();
        let provisioner = SecretProvisioner::for_admin(Arc::new(store.clone()));

        for bad in [json!({"value": 7}), json!({"value": ""}), json!({})] {
            store.set(&secret_key(), fields(bad)).await.unwrap();
            let err = provisioner.ensure_secret().await.unwrap_err();
            assert!(matches!(err, StoreError::MalformedDocument { .. }), "{:?}", err);
        }
    }

    /// Store whose first `get` misses a document another instance already created
    struct LateReader {
        inner: MemoryStore,
        missed: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for LateReader {
        async fn get(&self, key: &DocumentKey) -> Result<Option<Document>, StoreError> {
            if !self.missed.swap(true, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.get(key).await
        }
        async fn set(&self, key: &DocumentKey, f: Fields) -> Result<(), StoreError> {
            self.inner.set(key, f).await
        }
        async fn update(&self, key: &DocumentKey, f: Fields) -> Result<(), StoreError> {
            self.inner.update(key, f).await
        }
        async fn create(&self, key: &DocumentKey, f: Fields) -> Result<bool, StoreError> {
            self.inner.create(key, f).await
        }
        async fn delete(&self, key: &DocumentKey) -> Result<bool, StoreError> {
            self.inner.delete(key).await
        }
        async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
            self.inner.list(collection).await
        }
        async fn find_by_field(
            &self,
            collection: &str,
            field: &str,
            value: &Value,
        ) -> Result<Vec<Document>, StoreError> {
            self.inner.find_by_field(collection, field, value).await
        }
        async fn health(&self) -> Result<(), StoreError> {
            self.inner.health().await
        }
        async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
            self.inner.begin().await
        }
    }

    #[tokio::test]
    async fn losing_creator_adopts_the_stored_secret() {
        let inner = MemoryStore::new();
        inner
            .set(&secret_key(), fields(json!({"value": "winner"})))
            .await
            .unwrap();
        let store = LateReader {
            inner: inner.clone(),
            missed: AtomicBool::new(false),
        };

        assert_eq!(ensure_secret(&store, &secret_key()).await.unwrap(), "winner");
        assert_eq!(inner.write_count(&secret_key()).await, 1);
    }

    #[tokio::test]
    async fn secret_deleted_after_lost_create_is_a_backend_error() {
        // Every read misses, so the create loses and the re-read finds nothing
        struct AlwaysMissing(MemoryStore);

        #[async_trait]
        impl DocumentStore for AlwaysMissing {
            async fn get(&self, _key: &DocumentKey) -> Result<Option<Document>, StoreError> {
                Ok(None)
            }
            async fn set(&self, key: &DocumentKey, f: Fields) -> Result<(), StoreError> {
                self.0.set(key, f).await
            }
            async fn update(&self, key: &DocumentKey, f: Fields) -> Result<(), StoreError> {
                self.0.update(key, f).await
            }
            async fn create(&self, key: &DocumentKey, f: Fields) -> Result<bool, StoreError> {
                self.0.create(key, f).await
            }
            async fn delete(&self, key: &DocumentKey) -> Result<bool, StoreError> {
                self.0.delete(key).await
            }
            async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
                self.0.list(collection).await
            }
            async fn find_by_field(
                &self,
                collection: &str,
                field: &str,
                value: &Value,
            ) -> Result<Vec<Document>, StoreError> {
                self.0.find_by_field(collection, field, value).await
            }
            async fn health(&self) -> Result<(), StoreError> {
                Ok(())
            }
            async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
                self.0.begin().await
            }
        }

        let inner = MemoryStore::new();
        inner
            .set(&secret_key(), fields(json!({"value": "someone-else"})))
            .await
            .unwrap();

        let err = ensure_secret(&AlwaysMissing(inner), &secret_key()).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)), "{:?}", err);
    }
}
