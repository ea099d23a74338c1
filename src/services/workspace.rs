use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::services::user_service::validate_account_id;

/// Sub-folders every user workspace gets
pub const WORKSPACE_FOLDERS: [&str; 4] = ["metadata", "model", "output", "upload"];

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Invalid account id for workspace: {0}")]
    InvalidAccountId(String),

    #[error("Failed to create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Folder locations of one user's workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    pub base: PathBuf,
    pub metadata: PathBuf,
    pub model: PathBuf,
    pub output: PathBuf,
    pub upload: PathBuf,
}

impl WorkspacePaths {
    fn under(base: PathBuf) -> Self {
        Self {
            metadata: base.join("metadata"),
            model: base.join("model"),
            output: base.join("output"),
            upload: base.join("upload"),
            base,
        }
    }
}

/// Creates per-user folders under a shared root.
///
/// Layout: `<root>/<account id>/{metadata,model,output,upload}`. Creation is
/// idempotent, so provisioning an existing workspace is harmless.
#[derive(Debug, Clone)]
pub struct WorkspaceProvisioner {
    root: PathBuf,
}

impl WorkspaceProvisioner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the workspace for `account_id` lives, without touching the disk
    pub fn paths(&self, account_id: &str) -> Result<WorkspacePaths, WorkspaceError> {
        validate_account_id(account_id)
            .map_err(|_| WorkspaceError::InvalidAccountId(account_id.to_string()))?;
        Ok(WorkspacePaths::under(self.root.join(account_id)))
    }

    /// Make sure the root exists (called once at startup)
    pub async fn init(&self) -> Result<(), WorkspaceError> {
        create_dir(&self.root).await
    }

    pub async fn provision(&self, account_id: &str) -> Result<WorkspacePaths, WorkspaceError> {
        let paths = self.paths(account_id)?;
        for folder in [&paths.metadata, &paths.model, &paths.output, &paths.upload] {
            create_dir(folder).await?;
        }
        info!(account = account_id, base = %paths.base.display(), "Provisioned user workspace");
        Ok(paths)
    }
}

async fn create_dir(path: &Path) -> Result<(), WorkspaceError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| WorkspaceError::Io {
            path: path.to_path_buf(),
            source,
        })
}
