use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tenant_desk::{app, config::AppConfig, AppState};

#[derive(Parser)]
#[command(name = "tenant-desk")]
#[command(about = "Multi-tenant user desk backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the HTTP server (default)")]
    Serve {
        #[arg(long, help = "Port to listen on (overrides PORT/API_PORT)")]
        port: Option<u16>,

        #[arg(long, help = "Root folder for user workspaces (overrides STORAGE_USERS_DIR)")]
        users_dir: Option<PathBuf>,
    },

    #[command(about = "Provision the admin key if needed and print it")]
    AdminKey,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, SESSION_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = tenant_desk::config::config().clone();

    match cli.command.unwrap_or(Commands::Serve { port: None, users_dir: None }) {
        Commands::Serve { port, users_dir } => {
            if let Some(port) = port {
                config.api.port = port;
            }
            if let Some(users_dir) = users_dir {
                config.storage.users_dir = users_dir;
            }
            serve(config).await
        }
        Commands::AdminKey => {
            println!("{}", admin_key(config).await?);
            Ok(())
        }
    }
}

/// Provision (or read back) the admin key in the configured database.
///
/// Refused without `DATABASE_URL`: a key minted in a throwaway in-memory store
/// would be accepted by no server.
async fn admin_key(config: AppConfig) -> anyhow::Result<String> {
    if config.database.url.is_none() {
        anyhow::bail!("admin-key needs DATABASE_URL; the in-memory store does not persist");
    }

    let store = AppState::connect_store(&config).await?;
    let state = AppState::new(config, store)?;
    Ok(state.admin_secret.ensure_secret().await?)
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!("Starting tenant-desk in {:?} mode", config.environment);

    let port = config.api.port;
    let store = AppState::connect_store(&config).await.context("failed to open document store")?;
    let state = AppState::new(config, store)?;
    state.bootstrap().await.context("startup provisioning failed")?;

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("tenant-desk listening on http://{}", bind_addr);

    axum::serve(listener, app(state)).await.context("server error")?;
    Ok(())
}
