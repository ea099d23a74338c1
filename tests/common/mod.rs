#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};

use tenant_desk::config::AppConfig;
use tenant_desk::store::{DocumentStore, MemoryStore};
use tenant_desk::{app, AppState};

/// An in-process server on its own port, backed by a fresh in-memory store
/// and a temporary users folder.
pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    pub admin_key: String,
    pub store: MemoryStore,
    pub users_dir: tempfile::TempDir,
    pub client: Client,
}

impl TestServer {
    pub async fn spawn() -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);
        let users_dir = tempfile::tempdir().context("failed to create users dir")?;

        let mut config = AppConfig::development();
        config.api.port = port;
        config.storage.users_dir = users_dir.path().to_path_buf();
        // Concurrent-registration tests contend on the counter
        config.database.transaction_attempts = 32;

        let store = MemoryStore::new();
        let shared: Arc<dyn DocumentStore> = Arc::new(store.clone());
        let state = AppState::new(config, shared)?;
        let admin_key = state.bootstrap().await?;

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("failed to bind port {}", port))?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app(state)).await;
        });

        let server = Self {
            port,
            base_url,
            admin_key,
            store,
            users_dir,
            client: Client::new(),
        };
        server.wait_ready(Duration::from_secs(5)).await?;
        Ok(server)
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            if let Ok(resp) = self.client.get(self.url("/health")).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn post(&self, path: &str, token: Option<&str>, body: &Value) -> Result<Response> {
        let mut req = self.client.post(self.url(path)).json(body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?)
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<Response> {
        let mut req = self.client.get(self.url(path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?)
    }

    /// Register `account_id` and return the session token from the response
    pub async fn register(&self, account_id: &str, user_name: &str) -> Result<String> {
        let res = self.post("/api/register", None, &registration(account_id, user_name)).await?;
        anyhow::ensure!(res.status() == StatusCode::CREATED, "register {} failed: {}", account_id, res.status());
        token_of(res).await
    }

    /// Exchange the admin key for an admin session
    pub async fn admin_token(&self) -> Result<String> {
        let res = self
            .post("/api/admin/login", None, &json!({ "value": self.admin_key }))
            .await?;
        anyhow::ensure!(res.status() == StatusCode::OK, "admin login failed: {}", res.status());
        token_of(res).await
    }
}

pub fn registration(account_id: &str, user_name: &str) -> Value {
    json!({
        "ID": account_id,
        "PW": format!("{}-password", account_id),
        "department": "Research",
        "email": format!("{}@example.com", account_id),
        "phone": "010-0000-0000",
        "user_name": user_name,
    })
}

pub async fn token_of(res: Response) -> Result<String> {
    let body: Value = res.json().await?;
    body["data"]["token"]
        .as_str()
        .map(str::to_string)
        .context("response carried no token")
}
