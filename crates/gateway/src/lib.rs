//! docvault gateway: tenant-isolated sessions and upload grants.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use docvault_protocol::paths;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod crypto;
pub mod error;
pub mod extractors;
pub mod grant;
pub mod handlers;
pub mod keys;
pub mod models;
pub mod password;
pub mod retry;
pub mod session;
pub mod storage;
pub mod store;
pub mod token;

use config::{Config, CookiePolicy};
use error::GatewayResult;
use grant::{Presigner, UploadGrantor};
use password::Passwords;
use retry::RetryConfig;
use session::{SessionManager, SessionSettings};
use storage::StorageBackend;
use store::CredentialStore;
use token::AccessTokenIssuer;

/// Room for multipart boundaries and part headers on top of the file.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

pub struct AppState {
    pub sessions: SessionManager,
    pub uploads: UploadGrantor,
    pub storage: Arc<dyn StorageBackend>,
    pub storage_retry: RetryConfig,
    pub cookies: CookiePolicy,
    pub refresh_cookie_max_age: Duration,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: CredentialStore,
        presigner: Arc<Presigner>,
        storage: Arc<dyn StorageBackend>,
    ) -> GatewayResult<Self> {
        let store_retry = RetryConfig::default()
            .with_max_retries(config.retry_max_attempts)
            .with_base_delay(config.retry_base_delay)
            .with_attempt_timeout(config.store_timeout);
        let storage_retry = RetryConfig::default()
            .with_max_retries(config.retry_max_attempts)
            .with_base_delay(config.retry_base_delay)
            .with_attempt_timeout(config.storage_timeout);

        let sessions = SessionManager::new(
            store,
            AccessTokenIssuer::new(config.jwt_secret.as_bytes(), config.access_token_ttl),
            Passwords::new(&config.password_hash)?,
            store_retry,
            SessionSettings {
                refresh_ttl: config.refresh_token_ttl,
                login_max_failures: config.login_max_failures,
                login_lockout: config.login_lockout,
            },
        );

        Ok(Self {
            sessions,
            uploads: UploadGrantor::new(presigner, config.upload_url_ttl, config.max_upload_bytes),
            storage,
            storage_retry,
            cookies: config.cookie,
            refresh_cookie_max_age: config.refresh_token_ttl,
        })
    }
}

pub fn router(state: Arc<AppState>, cors_origin: Option<&str>) -> Router {
    let body_limit = state
        .uploads
        .max_upload_bytes()
        .saturating_add(MULTIPART_OVERHEAD)
        .try_into()
        .unwrap_or(usize::MAX);

    let mut app = Router::new()
        .route("/readyz", get(health_check))
        .route(paths::LOGIN, post(handlers::auth::login))
        .route(paths::REFRESH, post(handlers::auth::refresh))
        .route(paths::LOGOUT, post(handlers::auth::logout))
        .route(paths::ME, get(handlers::auth::me))
        .route(paths::CHANGE_PASSWORD, post(handlers::auth::change_password))
        .route(paths::UPLOAD_URL, post(handlers::upload::upload_url))
        .route(paths::VALIDATE_KEY, post(handlers::upload::validate_key))
        .route(
            paths::DIRECT_UPLOAD,
            post(handlers::upload::direct_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .layer(TraceLayer::new_for_http());

    // Credentialed CORS cannot use a wildcard origin, so it is opt-in.
    if let Some(origin) = cors_origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        let cors = CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true);
        app = app.layer(cors);
    }

    app.with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "docvault-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
