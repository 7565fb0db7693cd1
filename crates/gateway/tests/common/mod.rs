#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use chrono::Utc;
use docvault_gateway::config::Config;
use docvault_gateway::grant::{Presigner, StorageCredentials};
use docvault_gateway::models::{LoginHistoryEntry, Tenant, User};
use docvault_gateway::password::Passwords;
use docvault_gateway::storage::MemoryBackend;
use docvault_gateway::store::{CredentialStore, MemoryStore};
use docvault_gateway::{router, AppState};
use docvault_protocol::REFRESH_COOKIE;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "correct horse battery";
pub const MAX_UPLOAD_BYTES: u64 = 1024;
pub const UPLOAD_TTL_SECS: i64 = 5 * 60;

pub struct Harness {
    pub app: Router,
    pub store: Arc<MemoryStore>,
    pub backend: Arc<MemoryBackend>,
    pub tenant_a: Tenant,
    pub tenant_b: Tenant,
    pub alice: User,
    pub bob: User,
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Reply {
    pub fn code(&self) -> Option<&str> {
        self.body["code"].as_str()
    }

    pub fn set_cookie(&self) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&format!("{REFRESH_COOKIE}=")))
            .map(str::to_string)
    }

    /// `name=value` of the refresh cookie, ready for a `Cookie` header.
    pub fn refresh_cookie(&self) -> String {
        self.set_cookie()
            .and_then(|c| c.split(';').next().map(str::to_string))
            .expect("refresh cookie set")
    }

    pub fn access_token(&self) -> String {
        self.body["accessToken"]
            .as_str()
            .expect("access token in body")
            .to_string()
    }
}

fn config() -> Config {
    let vars: HashMap<&str, String> = [
        ("JWT_SECRET", "integration-test-secret-0123456789abcdef".to_string()),
        ("ARGON2_MEMORY_KIB", "1024".to_string()),
        ("ARGON2_ITERATIONS", "1".to_string()),
        ("LOGIN_MAX_FAILURES", "3".to_string()),
        ("MAX_UPLOAD_BYTES", MAX_UPLOAD_BYTES.to_string()),
        ("UPLOAD_URL_TTL_MINUTES", (UPLOAD_TTL_SECS / 60).to_string()),
        ("RETRY_BASE_DELAY_MS", "1".to_string()),
    ]
    .into_iter()
    .collect();
    Config::from_lookup(|name| vars.get(name).cloned()).expect("test config")
}

fn tenant(name: &str) -> Tenant {
    Tenant {
        id: Uuid::new_v4(),
        name: name.to_string(),
        status: "active".to_string(),
        approval_status: "approved".to_string(),
        created_at: Utc::now(),
    }
}

async fn user(passwords: &Passwords, tenant: &Tenant, email: &str) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        tenant_id: tenant.id,
        email: email.to_string(),
        name: Some(email.split('@').next().unwrap_or_default().to_string()),
        password_hash: passwords.hash(PASSWORD.to_string()).await.unwrap(),
        role: "member".to_string(),
        status: "active".to_string(),
        created_at: now,
        updated_at: now,
    }
}

pub async fn harness() -> Harness {
    let config = config();
    let passwords = Passwords::new(&config.password_hash).unwrap();

    let store = Arc::new(MemoryStore::new());
    let tenant_a = tenant("alpha");
    let tenant_b = tenant("beta");
    let alice = user(&passwords, &tenant_a, "alice@alpha.test").await;
    let bob = user(&passwords, &tenant_b, "bob@beta.test").await;
    store.insert_tenant(tenant_a.clone()).await;
    store.insert_tenant(tenant_b.clone()).await;
    store.insert_user(alice.clone()).await;
    store.insert_user(bob.clone()).await;

    let presigner = Arc::new(Presigner::new(
        StorageCredentials::from_config(&config.storage).unwrap(),
    ));
    let backend = Arc::new(MemoryBackend::new(presigner.clone()));

    let state = AppState::new(
        &config,
        CredentialStore::memory(store.clone()),
        presigner,
        backend.clone(),
    )
    .unwrap();

    Harness {
        app: router(Arc::new(state), None),
        store,
        backend,
        tenant_a,
        tenant_b,
        alice,
        bob,
    }
}

impl Harness {
    pub async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        Reply {
            status,
            headers,
            body,
        }
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: Value,
        bearer: Option<&str>,
        cookie: Option<&str>,
    ) -> Reply {
        let mut builder = Request::post(path).header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn get(&self, path: &str, bearer: Option<&str>) -> Reply {
        let mut builder = Request::get(path);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn login(&self, email: &str, remember_me: bool) -> Reply {
        self.post_json(
            "/auth/login",
            serde_json::json!({
                "email": email,
                "password": PASSWORD,
                "rememberMe": remember_me,
            }),
            None,
            None,
        )
        .await
    }

    /// History is written in the background; give it a moment to land.
    pub async fn wait_for_history(&self, count: usize) -> Vec<LoginHistoryEntry> {
        for _ in 0..100 {
            let entries = self.store.login_history().await;
            if entries.len() >= count {
                return entries;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.store.login_history().await
    }
}
