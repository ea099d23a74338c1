use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::{password_digest, secrets_match};
use crate::services::sequence_counter::SequenceCounter;
use crate::services::workspace::{WorkspaceError, WorkspacePaths, WorkspaceProvisioner};
use crate::store::{run_transaction, Document, DocumentKey, DocumentStore, Fields, StoreError};

pub const USER_COLLECTION: &str = "User";

/// Registration fields, in the order they are checked
pub const REQUIRED_FIELDS: [&str; 6] = ["ID", "PW", "department", "email", "phone", "user_name"];

#[derive(Debug, Error)]
pub enum UserError {
    #[error("{0} field is required")]
    MissingField(&'static str),

    #[error("{field} must be a string")]
    InvalidField { field: &'static str },

    #[error("Invalid account ID: {0}")]
    InvalidAccountId(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Nothing to update")]
    EmptyUpdate,

    #[error("Account ID already in use: {0}")]
    AlreadyExists(String),

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Invalid account ID or password")]
    InvalidCredentials,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// Folder references kept on the user document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "RANK")]
    pub rank: i64,
    pub metadata: String,
    pub model: String,
    pub output: String,
    pub upload: String,
}

impl UserProfile {
    fn from_paths(paths: &WorkspacePaths) -> Self {
        Self {
            rank: 0,
            metadata: paths.metadata.display().to_string(),
            model: paths.model.display().to_string(),
            output: paths.output.display().to_string(),
            upload: paths.upload.display().to_string(),
        }
    }
}

/// A user document as stored (`User/<ID>`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "ID")]
    pub account_id: String,
    #[serde(rename = "PW")]
    pub password_digest: String,
    pub department: String,
    pub email: String,
    pub phone: String,
    pub user_id: u64,
    pub user_name: String,
    #[serde(rename = "User_Profile")]
    pub profile: UserProfile,
}

impl UserRecord {
    fn from_document(doc: &Document) -> Result<Self, StoreError> {
        serde_json::from_value(Value::Object(doc.fields.clone()))
            .map_err(|e| doc.malformed(e.to_string()))
    }

    fn to_fields(&self) -> Result<Fields, StoreError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StoreError::Backend("user record did not serialize to an object".into())),
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }

    pub fn view(&self) -> UserView {
        UserView::from(self.clone())
    }
}

/// What clients get to see of a user: everything except the password
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    #[serde(rename = "ID")]
    pub account_id: String,
    pub department: String,
    pub email: String,
    pub phone: String,
    pub user_id: u64,
    pub user_name: String,
    #[serde(rename = "User_Profile")]
    pub profile: UserProfile,
}

impl From<UserRecord> for UserView {
    fn from(record: UserRecord) -> Self {
        Self {
            account_id: record.account_id,
            department: record.department,
            email: record.email,
            phone: record.phone,
            user_id: record.user_id,
            user_name: record.user_name,
            profile: record.profile,
        }
    }
}

/// Validated registration request
#[derive(Debug, Clone)]
pub struct NewUser {
    pub account_id: String,
    pub password: String,
    pub department: String,
    pub email: String,
    pub phone: String,
    pub user_name: String,
}

impl NewUser {
    /// Check a raw JSON body: every registration field present and a string,
    /// and an account ID usable as a folder name.
    pub fn from_json(body: &Value) -> Result<Self, UserError> {
        for field in REQUIRED_FIELDS {
            if body.get(field).is_none() {
                return Err(UserError::MissingField(field));
            }
        }

        let text = |field: &'static str| -> Result<String, UserError> {
            body.get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(UserError::InvalidField { field })
        };

        let user = Self {
            account_id: text("ID")?,
            password: text("PW")?,
            department: text("department")?,
            email: text("email")?,
            phone: text("phone")?,
            user_name: text("user_name")?,
        };

        validate_account_id(&user.account_id).map_err(UserError::InvalidAccountId)?;
        Ok(user)
    }
}

/// Admin edits. `ID` and `user_id` are not editable, so unknown keys are rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserUpdate {
    #[serde(rename = "PW")]
    pub password: Option<String>,
    pub department: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub user_name: Option<String>,
    #[serde(rename = "RANK")]
    pub rank: Option<i64>,
}

impl UserUpdate {
    pub fn from_json(body: Value) -> Result<Self, UserError> {
        let update: Self = serde_json::from_value(body).map_err(|e| UserError::InvalidUpdate(e.to_string()))?;
        if update.is_empty() {
            return Err(UserError::EmptyUpdate);
        }
        Ok(update)
    }

    pub fn is_empty(&self) -> bool {
        self.password.is_none()
            && self.department.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.user_name.is_none()
            && self.rank.is_none()
    }

    fn apply(&self, record: &mut UserRecord) {
        if let Some(password) = &self.password {
            record.password_digest = password_digest(password);
        }
        if let Some(department) = &self.department {
            record.department = department.clone();
        }
        if let Some(email) = &self.email {
            record.email = email.clone();
        }
        if let Some(phone) = &self.phone {
            record.phone = phone.clone();
        }
        if let Some(user_name) = &self.user_name {
            record.user_name = user_name.clone();
        }
        if let Some(rank) = self.rank {
            record.profile.rank = rank;
        }
    }
}

/// Validate account ID format.
///
/// The ID doubles as a directory name, so it is restricted to 3-50 ASCII
/// letters, digits, `_`, `-` and `.`, starting with a letter or digit.
pub fn validate_account_id(account_id: &str) -> Result<(), String> {
    if account_id.len() < 3 {
        return Err("Account ID must be at least 3 characters".to_string());
    }

    if account_id.len() > 50 {
        return Err("Account ID must be at most 50 characters".to_string());
    }

    if !account_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err("Account ID can only contain letters, numbers, '_', '-' and '.'".to_string());
    }

    if !account_id.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err("Account ID must start with a letter or number".to_string());
    }

    Ok(())
}

/// User accounts on top of the document store
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn DocumentStore>,
    counter: SequenceCounter,
    workspaces: WorkspaceProvisioner,
    attempts: u32,
}

impl UserService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        counter: SequenceCounter,
        workspaces: WorkspaceProvisioner,
        attempts: u32,
    ) -> Self {
        Self {
            store,
            counter,
            workspaces,
            attempts,
        }
    }

    pub fn workspaces(&self) -> &WorkspaceProvisioner {
        &self.workspaces
    }

    fn key(account_id: &str) -> DocumentKey {
        DocumentKey::new(USER_COLLECTION, account_id)
    }

    /// Create the account and its workspace.
    ///
    /// The numeric `user_id` is drawn from the sequence counter; if a
    /// concurrent registration claims the same account ID first, that id is
    /// simply skipped.
    pub async fn register(&self, new_user: NewUser) -> Result<UserRecord, UserError> {
        let key = Self::key(&new_user.account_id);
        if self.store.get(&key).await?.is_some() {
            return Err(UserError::AlreadyExists(new_user.account_id));
        }

        // Folders first: a disk failure should not burn an id or leave an
        // account without its workspace. Provisioning is idempotent.
        let paths = self.workspaces.provision(&new_user.account_id).await?;
        let user_id = self.counter.allocate_next_id().await?;

        let record = UserRecord {
            account_id: new_user.account_id,
            password_digest: password_digest(&new_user.password),
            department: new_user.department,
            email: new_user.email,
            phone: new_user.phone,
            user_id,
            user_name: new_user.user_name,
            profile: UserProfile::from_paths(&paths),
        };

        if !self.store.create(&key, record.to_fields()?).await? {
            warn!(account = %record.account_id, user_id, "Lost registration race, id left unused");
            return Err(UserError::AlreadyExists(record.account_id));
        }

        info!(account = %record.account_id, user_id, "Registered user");
        Ok(record)
    }

    pub async fn get(&self, account_id: &str) -> Result<Option<UserRecord>, UserError> {
        match self.store.get(&Self::key(account_id)).await? {
            Some(doc) => Ok(Some(UserRecord::from_document(&doc)?)),
            None => Ok(None),
        }
    }

    /// Look the account up and check its password
    pub async fn authenticate(&self, account_id: &str, password: &str) -> Result<UserRecord, UserError> {
        let record = self.get(account_id).await?.ok_or(UserError::InvalidCredentials)?;
        if !secrets_match(&password_digest(password), &record.password_digest) {
            return Err(UserError::InvalidCredentials);
        }
        Ok(record)
    }

    /// All users, or those whose `user_name` matches exactly
    pub async fn list(&self, user_name: Option<&str>) -> Result<Vec<UserRecord>, UserError> {
        let docs = match user_name {
            Some(name) => {
                self.store
                    .find_by_field(USER_COLLECTION, "user_name", &Value::String(name.to_string()))
                    .await?
            }
            None => self.store.list(USER_COLLECTION).await?,
        };

        docs.iter()
            .map(|doc| UserRecord::from_document(doc).map_err(UserError::from))
            .collect()
    }

    /// Apply an admin edit as one read-modify-write
    pub async fn update(&self, account_id: &str, update: UserUpdate) -> Result<UserRecord, UserError> {
        let key = Self::key(account_id);

        let updated = run_transaction(self.store.as_ref(), &key, self.attempts, |tx| {
            let key = key.clone();
            let update = update.clone();
            Box::pin(async move {
                let Some(doc) = tx.get(&key).await? else {
                    return Ok::<_, StoreError>(None);
                };
                let mut record = UserRecord::from_document(&doc)?;
                update.apply(&mut record);
                tx.set(&key, record.to_fields()?).await?;
                Ok(Some(record))
            })
        })
        .await?;

        let record = updated.ok_or_else(|| UserError::NotFound(account_id.to_string()))?;
        info!(account = account_id, "Updated user");
        Ok(record)
    }

    pub async fn delete(&self, account_id: &str) -> Result<(), UserError> {
        if !self.store.delete(&Self::key(account_id)).await? {
            return Err(UserError::NotFound(account_id.to_string()));
        }
        info!(account = account_id, "Deleted user");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    struct Fixture {
        store: MemoryStore,
        service: UserService,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let shared: Arc<dyn DocumentStore> = Arc::new(store.clone());
        let service = UserService::new(
            shared.clone(),
            SequenceCounter::for_users(shared, 5),
            WorkspaceProvisioner::new(dir.path()),
            5,
        );
        Fixture {
            store,
            service,
            _dir: dir,
        }
    }

    fn body(id: &str, name: &str) -> Value {
        json!({
            "ID": id,
            "PW": "pw-1234",
            "department": "research",
            "email": format!("{}@example.com", id),
            "phone": "010-0000-0000",
            "user_name": name,
        })
    }

    fn new_user(id: &str, name: &str) -> NewUser {
        NewUser::from_json(&body(id, name)).unwrap()
    }

    #[test]
    fn first_missing_field_is_reported() {
        let mut value = body("alice", "Alice");
        value.as_object_mut().unwrap().remove("email");
        value.as_object_mut().unwrap().remove("phone");

        let err = NewUser::from_json(&value).unwrap_err();
        assert!(matches!(err, UserError::MissingField("email")));
    }

    #[test]
    fn non_string_fields_are_rejected() {
        let mut value = body("alice", "Alice");
        value["phone"] = json!(1234);
        assert!(matches!(
            NewUser::from_json(&value),
            Err(UserError::InvalidField { field: "phone" })
        ));
    }

    #[test]
    fn account_id_rules() {
        assert!(validate_account_id("alice").is_ok());
        assert!(validate_account_id("a.b-c_d9").is_ok());
        assert!(validate_account_id("ab").is_err());
        assert!(validate_account_id("../etc").is_err());
        assert!(validate_account_id(".alice").is_err());
        assert!(validate_account_id("al ice").is_err());
        assert!(validate_account_id(&"x".repeat(51)).is_err());
    }

    #[test]
    fn update_rejects_immutable_and_empty_bodies() {
        assert!(matches!(
            UserUpdate::from_json(json!({"user_id": 5})),
            Err(UserError::InvalidUpdate(_))
        ));
        assert!(matches!(
            UserUpdate::from_json(json!({"ID": "bob"})),
            Err(UserError::InvalidUpdate(_))
        ));
        assert!(matches!(UserUpdate::from_json(json!({})), Err(UserError::EmptyUpdate)));
    }

    #[tokio::test]
    async fn register_assigns_sequential_ids_and_workspaces() {
        let f = fixture();

        let alice = f.service.register(new_user("alice", "Alice")).await.unwrap();
        let bob = f.service.register(new_user("bob", "Bob")).await.unwrap();

        assert_eq!(alice.user_id, 1);
        assert_eq!(bob.user_id, 2);
        assert_eq!(alice.profile.rank, 0);
        assert_ne!(alice.password_digest, "pw-1234");
        assert!(std::path::Path::new(&alice.profile.upload).is_dir());
        assert!(alice.profile.metadata.ends_with("metadata"));

        let stored = f.service.get("alice").await.unwrap().unwrap();
        assert_eq!(stored, alice);
    }

    #[tokio::test]
    async fn duplicate_account_id_does_not_consume_an_id() {
        let f = fixture();
        f.service.register(new_user("alice", "Alice")).await.unwrap();

        let err = f.service.register(new_user("alice", "Other")).await.unwrap_err();
        assert!(matches!(err, UserError::AlreadyExists(_)));

        let bob = f.service.register(new_user("bob", "Bob")).await.unwrap();
        assert_eq!(bob.user_id, 2);
    }

    #[tokio::test]
    async fn authenticate_checks_password() {
        let f = fixture();
        f.service.register(new_user("alice", "Alice")).await.unwrap();

        assert!(f.service.authenticate("alice", "pw-1234").await.is_ok());
        assert!(matches!(
            f.service.authenticate("alice", "wrong").await,
            Err(UserError::InvalidCredentials)
        ));
        assert!(matches!(
            f.service.authenticate("nobody", "pw-1234").await,
            Err(UserError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn list_filters_by_exact_user_name() {
        let f = fixture();
        f.service.register(new_user("kim1", "Kim")).await.unwrap();
        f.service.register(new_user("lee1", "Lee")).await.unwrap();
        f.service.register(new_user("kim2", "Kim")).await.unwrap();

        assert_eq!(f.service.list(None).await.unwrap().len(), 3);
        let kims: Vec<_> = f
            .service
            .list(Some("Kim"))
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.account_id)
            .collect();
        assert_eq!(kims, vec!["kim1", "kim2"]);
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let f = fixture();
        let before = f.service.register(new_user("alice", "Alice")).await.unwrap();

        let update = UserUpdate::from_json(json!({"department": "ops", "RANK": 3, "PW": "new"})).unwrap();
        let after = f.service.update("alice", update).await.unwrap();

        assert_eq!(after.department, "ops");
        assert_eq!(after.profile.rank, 3);
        assert_eq!(after.user_id, before.user_id);
        assert_eq!(after.email, before.email);
        assert!(f.service.authenticate("alice", "new").await.is_ok());
    }

    #[tokio::test]
    async fn update_and_delete_of_missing_user_are_not_found() {
        let f = fixture();
        let update = UserUpdate::from_json(json!({"department": "ops"})).unwrap();

        assert!(matches!(
            f.service.update("ghost", update).await,
            Err(UserError::NotFound(_))
        ));
        assert!(matches!(f.service.delete("ghost").await, Err(UserError::NotFound(_))));
        assert!(f.store.get(&UserService::key("ghost")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_the_document() {
        let f = fixture();
        f.service.register(new_user("alice", "Alice")).await.unwrap();

        f.service.delete("alice").await.unwrap();
        assert!(f.service.get("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn view_hides_password() {
        let f = fixture();
        let alice = f.service.register(new_user("alice", "Alice")).await.unwrap();

        let json = serde_json::to_value(alice.view()).unwrap();
        assert!(json.get("PW").is_none());
        assert_eq!(json["ID"], "alice");
        assert_eq!(json["User_Profile"]["RANK"], 0);
    }
}
