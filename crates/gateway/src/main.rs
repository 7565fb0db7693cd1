use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use docvault_gateway::config::{Config, DevSeed};
use docvault_gateway::grant::{Presigner, StorageCredentials};
use docvault_gateway::models::{Tenant, User};
use docvault_gateway::password::Passwords;
use docvault_gateway::storage::{MemoryBackend, S3Backend, StorageBackend};
use docvault_gateway::store::{CredentialStore, MemoryStore};
use docvault_gateway::{router, AppState};

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    info!(?config, "configuration loaded");

    let store = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to PostgreSQL...");
            let pool = PgPoolOptions::new()
                .max_connections(50)
                .acquire_timeout(config.store_timeout)
                .connect(database_url)
                .await
                .context("failed to connect to PostgreSQL")?;

            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Connected to database, migrations applied.");
            CredentialStore::postgres(pool)
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory credential store");
            let memory = Arc::new(MemoryStore::new());
            if let Some(seed) = &config.dev_seed {
                seed_memory_store(&memory, seed, &config).await?;
            }
            CredentialStore::memory(memory)
        }
    };

    let presigner = Arc::new(Presigner::new(StorageCredentials::from_config(
        &config.storage,
    )?));
    let storage: Arc<dyn StorageBackend> = match &config.storage.endpoint {
        Some(endpoint) => {
            info!(endpoint = %endpoint, bucket = %config.storage.bucket, "using S3-compatible storage");
            Arc::new(S3Backend::new(presigner.clone(), config.storage_timeout)?)
        }
        None => {
            warn!("STORAGE_ENDPOINT not set, using the in-memory storage backend");
            Arc::new(MemoryBackend::new(presigner.clone()))
        }
    };

    let state = Arc::new(AppState::new(&config, store, presigner, storage)?);

    let purge_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match purge_state.sessions.purge_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "purged expired refresh credentials"),
                Err(e) => error!(error = %e, "refresh credential purge failed"),
            }
        }
    });

    let app = router(state, config.cors_allowed_origin.as_deref());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    info!("docvault gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// One approved tenant with one admin, for local runs without Postgres.
async fn seed_memory_store(
    store: &MemoryStore,
    seed: &DevSeed,
    config: &Config,
) -> anyhow::Result<()> {
    let passwords = Passwords::new(&config.password_hash)?;
    let now = Utc::now();
    let tenant = Tenant {
        id: Uuid::new_v4(),
        name: "Development".to_string(),
        status: "active".to_string(),
        approval_status: "approved".to_string(),
        created_at: now,
    };
    let user = User {
        id: Uuid::new_v4(),
        tenant_id: tenant.id,
        email: docvault_gateway::session::normalize_email(&seed.email),
        name: Some("Development Admin".to_string()),
        password_hash: passwords.hash(seed.password.as_str().to_string()).await?,
        role: "admin".to_string(),
        status: "active".to_string(),
        created_at: now,
        updated_at: now,
    };

    info!(tenant_id = %tenant.id, user_id = %user.id, "seeded development tenant");
    store.insert_tenant(tenant).await;
    store.insert_user(user).await;
    Ok(())
}
