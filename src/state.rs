use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::auth::{SessionError, SessionKeys};
use crate::config::{AppConfig, ConfigError};
use crate::services::{SecretProvisioner, SequenceCounter, UserService, WorkspaceError, WorkspaceProvisioner};
use crate::store::{DocumentStore, MemoryStore, PgDocumentStore, StoreError};

#[derive(Debug, Error)]
pub enum StateSetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// Shared handles for request handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub users: UserService,
    pub admin_secret: SecretProvisioner,
    pub sessions: SessionKeys,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn DocumentStore>) -> Result<Self, StateSetupError> {
        let attempts = config.database.transaction_attempts;
        let sessions = SessionKeys::new(&config.session_secret()?, config.security.session_expiry_hours)?;

        let users = UserService::new(
            Arc::clone(&store),
            SequenceCounter::for_users(Arc::clone(&store), attempts),
            WorkspaceProvisioner::new(config.storage.users_dir.clone()),
            attempts,
        );

        Ok(Self {
            admin_secret: SecretProvisioner::for_admin(Arc::clone(&store)),
            config: Arc::new(config),
            store,
            users,
            sessions,
        })
    }

    /// Open the store named by the config: PostgreSQL when a URL is set,
    /// otherwise a fresh in-memory store.
    pub async fn connect_store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>, StateSetupError> {
        match &config.database.url {
            Some(url) => {
                let store = PgDocumentStore::connect(
                    url,
                    config.database.max_connections,
                    Duration::from_secs(config.database.connection_timeout),
                )
                .await?;
                store.migrate().await?;
                Ok(Arc::new(store))
            }
            None => {
                info!("DATABASE_URL not set, using in-memory document store");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }

    /// One-time startup work: the workspace root and the admin secret.
    /// Returns the admin secret.
    pub async fn bootstrap(&self) -> Result<String, StateSetupError> {
        self.users.workspaces().init().await?;
        Ok(self.admin_secret.ensure_secret().await?)
    }
}
