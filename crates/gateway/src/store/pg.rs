//! PostgreSQL credential store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    LoginHistoryRepository, NewRefreshToken, RefreshTokenRepository, RotateOutcome, StoreResult,
    Successor, TenantRepository, UserRepository,
};
use crate::models::{LoginHistoryEntry, RefreshTokenRecord, Tenant, User};

const USER_COLUMNS: &str =
    "id, tenant_id, email, name, password_hash, role, status, created_at, updated_at";

const REFRESH_COLUMNS: &str = "id, family_id, user_id, tenant_id, token_hash, remember_me, \
     issued_at, expires_at, revoked, revoked_at, replaced_by, ip_address, user_agent";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str, tenant_id: Option<Uuid>) -> StoreResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE email = $1 AND ($2::uuid IS NULL OR tenant_id = $2) \
             ORDER BY created_at"
        ))
        .bind(email)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn update_password_hash(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        password_hash: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $1, updated_at = NOW() \
             WHERE id = $2 AND tenant_id = $3",
        )
        .bind(password_hash)
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(super::StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl TenantRepository for PgStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "SELECT id, name, status, approval_status, created_at FROM tenants WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }
}

#[async_trait]
impl RefreshTokenRepository for PgStore {
    async fn create(&self, token: NewRefreshToken) -> StoreResult<RefreshTokenRecord> {
        let row = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            r#"
            INSERT INTO refresh_tokens
                (id, family_id, user_id, tenant_id, token_hash, remember_me,
                 issued_at, expires_at, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {REFRESH_COLUMNS}
            "#
        ))
        .bind(token.id)
        .bind(token.family_id)
        .bind(token.user_id)
        .bind(token.tenant_id)
        .bind(&token.token_hash)
        .bind(token.remember_me)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .bind(&token.ip_address)
        .bind(&token.user_agent)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_by_hash(&self, token_hash: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let row = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn rotate(
        &self,
        token_hash: &str,
        successor: Successor,
        now: DateTime<Utc>,
    ) -> StoreResult<RotateOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock: a concurrent rotation of the same hash blocks here and
        // then reads the committed, revoked state.
        let current = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE token_hash = $1 FOR UPDATE"
        ))
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            tx.rollback().await?;
            return Ok(RotateOutcome::NotFound);
        };

        if current.revoked {
            tx.rollback().await?;
            let reused = current.replaced_by.is_some();
            return Ok(RotateOutcome::Revoked {
                record: current,
                reused,
            });
        }

        if current.is_expired(now) {
            let expired = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
                "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $2 \
                 WHERE id = $1 RETURNING {REFRESH_COLUMNS}"
            ))
            .bind(current.id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(RotateOutcome::Expired(expired));
        }

        // Retire first: the one-active-per-family index would reject the
        // successor otherwise. The replaced_by FK is checked at commit.
        let previous = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $2, replaced_by = $3 \
             WHERE id = $1 RETURNING {REFRESH_COLUMNS}"
        ))
        .bind(current.id)
        .bind(now)
        .bind(successor.id)
        .fetch_one(&mut *tx)
        .await?;

        let next = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            r#"
            INSERT INTO refresh_tokens
                (id, family_id, user_id, tenant_id, token_hash, remember_me,
                 issued_at, expires_at, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {REFRESH_COLUMNS}
            "#
        ))
        .bind(successor.id)
        .bind(current.family_id)
        .bind(current.user_id)
        .bind(current.tenant_id)
        .bind(&successor.token_hash)
        .bind(current.remember_me)
        .bind(successor.issued_at)
        .bind(successor.expires_at)
        .bind(&successor.ip_address)
        .bind(&successor.user_agent)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(RotateOutcome::Rotated {
            previous,
            successor: next,
        })
    }

    async fn revoke_family(&self, family_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $2 \
             WHERE family_id = $1 AND NOT revoked",
        )
        .bind(family_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn revoke_all_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        except_family: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $4 \
             WHERE tenant_id = $1 AND user_id = $2 AND NOT revoked \
               AND ($3::uuid IS NULL OR family_id <> $3)",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(except_family)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LoginHistoryRepository for PgStore {
    async fn record(&self, entry: LoginHistoryEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO login_history
                (user_id, tenant_id, email, outcome, ip_address, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.tenant_id)
        .bind(&entry.email)
        .bind(entry.outcome.as_str())
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
