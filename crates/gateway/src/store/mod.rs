//! Credential store: users, tenants, refresh-credential records and login
//! history, behind async repository traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{LoginHistoryEntry, RefreshTokenRecord, Tenant, User};
use crate::retry::RetryableError;

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("credential store timed out after {0:?}")]
    Timeout(Duration),

    #[error("record not found")]
    NotFound,
}

impl RetryableError for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Sqlx(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Protocol(_)
            ),
            Self::NotFound => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ── REPOSITORY TRAITS ───────────────────────────────────────────

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<User>>;

    /// Every user with this (already normalised) email, optionally scoped to
    /// one tenant.
    async fn find_by_email(&self, email: &str, tenant_id: Option<Uuid>) -> StoreResult<Vec<User>>;

    async fn update_password_hash(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        password_hash: &str,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Tenant>>;
}

/// Input for a brand-new login session.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub family_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub token_hash: String,
    pub remember_me: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// The record that replaces a rotated one. Owner, tenant, family and the
/// remember-me policy are copied from the predecessor by the store.
#[derive(Debug, Clone)]
pub struct Successor {
    pub id: Uuid,
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RotateOutcome {
    Rotated {
        previous: RefreshTokenRecord,
        successor: RefreshTokenRecord,
    },
    NotFound,
    /// Past its expiry; the store has revoked it.
    Expired(RefreshTokenRecord),
    /// Already terminal. `reused` is set when it had been rotated before.
    Revoked {
        record: RefreshTokenRecord,
        reused: bool,
    },
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn create(&self, token: NewRefreshToken) -> StoreResult<RefreshTokenRecord>;

    async fn find_by_hash(&self, token_hash: &str) -> StoreResult<Option<RefreshTokenRecord>>;

    /// Check-and-rotate as one atomic unit: of two concurrent calls with the
    /// same hash exactly one can observe `Active`.
    async fn rotate(
        &self,
        token_hash: &str,
        successor: Successor,
        now: DateTime<Utc>,
    ) -> StoreResult<RotateOutcome>;

    /// Returns how many records transitioned. Revoking twice is not an error.
    async fn revoke_family(&self, family_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn revoke_all_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        except_family: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Delete records that expired before `cutoff`.
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait LoginHistoryRepository: Send + Sync {
    async fn record(&self, entry: LoginHistoryEntry) -> StoreResult<()>;
}

/// All repositories the gateway needs, as shared trait objects.
#[derive(Clone)]
pub struct CredentialStore {
    pub users: Arc<dyn UserRepository>,
    pub tenants: Arc<dyn TenantRepository>,
    pub refresh_tokens: Arc<dyn RefreshTokenRepository>,
    pub login_history: Arc<dyn LoginHistoryRepository>,
}

impl CredentialStore {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            users: store.clone(),
            tenants: store.clone(),
            refresh_tokens: store.clone(),
            login_history: store,
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            tenants: store.clone(),
            refresh_tokens: store.clone(),
            login_history: store,
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}
