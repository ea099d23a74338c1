use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use tracing::{debug, warn};

use super::{DocumentKey, DocumentStore, StoreError, Transaction};

/// Attempt budget used when the caller has no configured value
pub const DEFAULT_ATTEMPTS: u32 = 5;

const BACKOFF_BASE_MS: u64 = 2;
const BACKOFF_CAP_MS: u64 = 100;

/// Run `body` inside a store transaction, retrying on conflict.
///
/// Each attempt starts a fresh transaction, so the body re-reads everything it
/// depends on. Only [`StoreError::Conflict`] (from the body or from the
/// commit) triggers a retry; every other error is returned as-is. When all
/// `attempts` lose to concurrent writers the result is
/// [`StoreError::TransactionAborted`] for `key`, the document the body is
/// scoped to.
pub async fn run_transaction<T, F>(
    store: &dyn DocumentStore,
    key: &DocumentKey,
    attempts: u32,
    mut body: F,
) -> Result<T, StoreError>
where
    F: for<'t> FnMut(&'t mut dyn Transaction) -> BoxFuture<'t, Result<T, StoreError>>,
{
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        let mut tx = store.begin().await?;

        let result = body(tx.as_mut()).await;
        let outcome = match result {
            Ok(value) => tx.commit().await.map(|_| value),
            Err(err) => Err(err),
        };

        match outcome {
            Err(err) if err.is_conflict() => {
                debug!(%key, attempt, "transaction conflict, retrying");
                if attempt < attempts {
                    tokio::time::sleep(backoff(attempt)).await;
                }
            }
            other => return other,
        }
    }

    warn!(%key, attempts, "transaction aborted after exhausting retries");
    Err(StoreError::TransactionAborted {
        key: key.to_string(),
        attempts,
    })
}

/// Exponential backoff with full jitter
fn backoff(attempt: u32) -> Duration {
    let ceiling = BACKOFF_BASE_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(BACKOFF_CAP_MS);
    let millis = rand::thread_rng().gen_range(0..=ceiling);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{fields, MemoryStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_stays_under_cap() {
        for attempt in 0..40 {
            assert!(backoff(attempt) <= Duration::from_millis(BACKOFF_CAP_MS));
        }
    }

    #[tokio::test]
    async fn body_errors_other_than_conflict_are_not_retried() {
        let store = MemoryStore::new();
        let key = DocumentKey::new("Things", "a");
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = run_transaction(&store, &key, 5, |_tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err::<(), _>(StoreError::Unavailable("down".into())) })
        })
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persistent_conflict_aborts_after_budget() {
        let store = MemoryStore::new();
        let key = DocumentKey::new("Things", "a");
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = run_transaction(&store, &key, 3, |_tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err::<(), _>(StoreError::Conflict("Things/a".into())) })
        })
        .await;

        match result {
            Err(StoreError::TransactionAborted { key, attempts }) => {
                assert_eq!(key, "Things/a");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn committed_value_is_returned() {
        let store = MemoryStore::new();
        let key = DocumentKey::new("Things", "a");

        let written = run_transaction(&store, &key, 1, |tx| {
            let key = key.clone();
            Box::pin(async move {
                tx.set(&key, fields(json!({"n": 5}))).await?;
                Ok::<_, StoreError>(5)
            })
        })
        .await
        .unwrap();

        assert_eq!(written, 5);
        let doc = store.get(&key).await.unwrap().unwrap();
        assert_eq!(doc.field("n"), Some(&json!(5)));
    }
}
