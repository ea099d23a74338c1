mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn health_endpoint_reports_store_ok() -> Result<()> {
    let server = common::TestServer::spawn().await?;

    let res = server.get("/health", None).await?;
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["database"], "ok");
    Ok(())
}

#[tokio::test]
async fn root_describes_the_service() -> Result<()> {
    let server = common::TestServer::spawn().await?;

    let body: Value = server.get("/", None).await?.json().await?;
    assert_eq!(body["data"]["name"], "tenant-desk");
    assert!(body["data"]["endpoints"].get("admin").is_some());
    Ok(())
}

#[tokio::test]
async fn health_ignores_bad_session_tokens() -> Result<()> {
    let server = common::TestServer::spawn().await?;

    let res = server.get("/health", Some("not-a-token")).await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn bootstrap_provisions_one_admin_key() -> Result<()> {
    let server = common::TestServer::spawn().await?;

    assert_eq!(server.admin_key.len(), 32);
    assert!(server.admin_key.chars().all(|c| c.is_ascii_hexdigit()));

    let key = tenant_desk::store::DocumentKey::new("Key", "secret");
    assert_eq!(server.store.write_count(&key).await, 1);
    Ok(())
}
