use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool, Postgres};
use tracing::info;

use super::{Document, DocumentKey, DocumentStore, Fields, StoreError, Transaction};

const CREATE_DOCUMENTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        collection  TEXT        NOT NULL,
        id          TEXT        NOT NULL,
        fields      JSONB       NOT NULL,
        revision    BIGINT      NOT NULL DEFAULT 1,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (collection, id)
    )
"#;

const UPSERT: &str = r#"
    INSERT INTO documents (collection, id, fields)
    VALUES ($1, $2, $3)
    ON CONFLICT (collection, id)
    DO UPDATE SET fields = EXCLUDED.fields,
                  revision = documents.revision + 1,
                  updated_at = now()
"#;

const INSERT: &str = "INSERT INTO documents (collection, id, fields) VALUES ($1, $2, $3)";

const MERGE: &str = r#"
    UPDATE documents
    SET fields = fields || $3, revision = revision + 1, updated_at = now()
    WHERE collection = $1 AND id = $2
"#;

// SQLSTATEs that mean "lost a race, try again"
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) | Some(UNIQUE_VIOLATION) => {
                    StoreError::Conflict(db.message().to_string())
                }
                _ => StoreError::Backend(err.to_string()),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// PostgreSQL-backed document store.
///
/// Documents live in a single `documents` table keyed by `(collection, id)`
/// with their fields in a `jsonb` column. Transactions take row locks with
/// `SELECT ... FOR UPDATE`; two transactions racing to create the same absent
/// document collide on the primary key and the loser reports a conflict.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(database_url)
            .await?;

        info!("Created document store pool (max {} connections)", max_connections);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `documents` table if it does not exist yet
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_DOCUMENTS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed document store pool");
    }
}

fn to_documents(collection: &str, rows: Vec<(String, Json<Fields>)>) -> Vec<Document> {
    rows.into_iter()
        .map(|(id, Json(fields))| Document::new(DocumentKey::new(collection, id), fields))
        .collect()
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, key: &DocumentKey) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query_scalar::<_, Json<Fields>>(
            "SELECT fields FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(&key.collection)
        .bind(&key.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|Json(fields)| Document::new(key.clone(), fields)))
    }

    async fn set(&self, key: &DocumentKey, fields: Fields) -> Result<(), StoreError> {
        sqlx::query(UPSERT)
            .bind(&key.collection)
            .bind(&key.id)
            .bind(Json(&fields))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update(&self, key: &DocumentKey, partial: Fields) -> Result<(), StoreError> {
        let result = sqlx::query(MERGE)
            .bind(&key.collection)
            .bind(&key.id)
            .bind(Json(&partial))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn create(&self, key: &DocumentKey, fields: Fields) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO documents (collection, id, fields) VALUES ($1, $2, $3)
             ON CONFLICT (collection, id) DO NOTHING",
        )
        .bind(&key.collection)
        .bind(&key.id)
        .bind(Json(&fields))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, key: &DocumentKey) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(&key.collection)
            .bind(&key.id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query_as::<_, (String, Json<Fields>)>(
            "SELECT id, fields FROM documents WHERE collection = $1 ORDER BY id",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(to_documents(collection, rows))
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query_as::<_, (String, Json<Fields>)>(
            "SELECT id, fields FROM documents
             WHERE collection = $1 AND fields -> $2 = $3
             ORDER BY id",
        )
        .bind(collection)
        .bind(field)
        .bind(Json(value))
        .fetch_all(&self.pool)
        .await?;

        Ok(to_documents(collection, rows))
    }

    async fn health(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction {
            tx,
            absent: HashSet::new(),
        }))
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    /// Keys this transaction read as absent. Writing one of them must be a
    /// plain INSERT so a concurrent creator surfaces as a unique violation
    /// instead of being silently overwritten by an upsert.
    absent: HashSet<DocumentKey>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn get(&mut self, key: &DocumentKey) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query_scalar::<_, Json<Fields>>(
            "SELECT fields FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
        )
        .bind(&key.collection)
        .bind(&key.id)
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(Json(fields)) => Ok(Some(Document::new(key.clone(), fields))),
            None => {
                self.absent.insert(key.clone());
                Ok(None)
            }
        }
    }

    async fn set(&mut self, key: &DocumentKey, fields: Fields) -> Result<(), StoreError> {
        let statement = if self.absent.remove(key) { INSERT } else { UPSERT };
        sqlx::query(statement)
            .bind(&key.collection)
            .bind(&key.id)
            .bind(Json(&fields))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update(&mut self, key: &DocumentKey, partial: Fields) -> Result<(), StoreError> {
        let result = sqlx::query(MERGE)
            .bind(&key.collection)
            .bind(&key.id)
            .bind(Json(&partial))
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgTransaction { tx, .. } = *self;
        tx.commit().await?;
        Ok(())
    }
}
