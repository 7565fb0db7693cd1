//! Session lifecycle: login, refresh rotation, logout, password change.

use std::time::Duration;

use chrono::{DateTime, Utc};
use docvault_protocol::UserProfile;
use moka::future::Cache;
use tracing::{info, warn};
use uuid::Uuid;

use crate::crypto::{generate_refresh_token, hash_token, is_well_formed_refresh_token};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{ClientMetadata, LoginHistoryEntry, LoginOutcome, User};
use crate::password::{is_acceptable_password, Passwords, MAX_PASSWORD_LEN};
use crate::retry::{with_retry, with_timeout, RetryConfig};
use crate::store::{CredentialStore, NewRefreshToken, RotateOutcome, StoreError, Successor};
use crate::token::{AccessClaims, AccessTokenIssuer};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub refresh_ttl: Duration,
    pub login_max_failures: u32,
    pub login_lockout: Duration,
}

#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub email: String,
    pub password: String,
    pub tenant_hint: Option<String>,
    pub remember_me: bool,
}

/// A freshly minted credential pair. `refresh_token` is the raw value and
/// only ever leaves the gateway inside the refresh cookie.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access_token: String,
    pub expires_in: u64,
    pub refresh_token: String,
    pub remember_me: bool,
    pub session_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub session: IssuedSession,
    pub user: UserProfile,
}

pub struct SessionManager {
    store: CredentialStore,
    tokens: AccessTokenIssuer,
    passwords: Passwords,
    retry: RetryConfig,
    settings: SessionSettings,
    /// Failed attempts per `tenant-hint|email`, forgotten after the lockout.
    failures: Cache<String, u32>,
}

impl SessionManager {
    pub fn new(
        store: CredentialStore,
        tokens: AccessTokenIssuer,
        passwords: Passwords,
        retry: RetryConfig,
        settings: SessionSettings,
    ) -> Self {
        let failures = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(settings.login_lockout)
            .build();

        Self {
            store,
            tokens,
            passwords,
            retry,
            settings,
            failures,
        }
    }

    // ── LOGIN ───────────────────────────────────────────────────

    pub async fn login(
        &self,
        attempt: LoginAttempt,
        client: ClientMetadata,
    ) -> GatewayResult<LoginSuccess> {
        let email = normalize_email(&attempt.email);
        let tenant_hint = TenantHint::parse(attempt.tenant_hint.as_deref());
        let throttle_key = tenant_hint.throttle_key(&email);

        if self.is_locked_out(&throttle_key).await {
            warn!("login blocked by failure throttle");
            self.record_login(None, None, &email, LoginOutcome::Blocked, &client);
            return Err(GatewayError::InvalidCredentials);
        }

        match self.check_credentials(&email, tenant_hint, &attempt).await {
            Ok(user) => {
                self.failures.invalidate(&throttle_key).await;
                let session = self
                    .open_session(&user, attempt.remember_me, &client)
                    .await?;
                self.record_login(
                    Some(user.id),
                    Some(user.tenant_id),
                    &email,
                    LoginOutcome::Success,
                    &client,
                );
                info!(user_id = %user.id, tenant_id = %user.tenant_id, session_id = %session.session_id, "login succeeded");

                Ok(LoginSuccess {
                    session,
                    user: user.profile(),
                })
            }
            Err(CredentialCheck::Rejected(user)) => {
                self.note_failure(throttle_key).await;
                self.record_login(
                    user.as_ref().map(|u| u.id),
                    user.as_ref().map(|u| u.tenant_id),
                    &email,
                    LoginOutcome::Failed,
                    &client,
                );
                Err(GatewayError::InvalidCredentials)
            }
            Err(CredentialCheck::Failed(err)) => Err(err),
        }
    }

    async fn check_credentials(
        &self,
        email: &str,
        tenant_hint: TenantHint,
        attempt: &LoginAttempt,
    ) -> Result<User, CredentialCheck> {
        if email.is_empty()
            || attempt.password.is_empty()
            || attempt.password.chars().count() > MAX_PASSWORD_LEN
        {
            return Err(CredentialCheck::Rejected(None));
        }

        let tenant_hint = match tenant_hint {
            TenantHint::Any => None,
            TenantHint::Tenant(id) => Some(id),
            TenantHint::Malformed => {
                self.burn_dummy(&attempt.password).await?;
                return Err(CredentialCheck::Rejected(None));
            }
        };

        let users = self.store.users.clone();
        let mut matches = with_retry(&self.retry, || users.find_by_email(email, tenant_hint))
            .await
            .map_err(|e| CredentialCheck::Failed(e.into()))?;

        // Absent, or ambiguous across tenants without a hint.
        if matches.len() != 1 {
            self.burn_dummy(&attempt.password).await?;
            return Err(CredentialCheck::Rejected(None));
        }
        let user = matches.remove(0);

        let valid = self
            .passwords
            .verify(attempt.password.clone(), user.password_hash.clone())
            .await
            .map_err(CredentialCheck::Failed)?;
        if !valid || !user.is_active() {
            return Err(CredentialCheck::Rejected(Some(user)));
        }

        let tenants = self.store.tenants.clone();
        let tenant = with_retry(&self.retry, || tenants.find_by_id(user.tenant_id))
            .await
            .map_err(|e| CredentialCheck::Failed(e.into()))?;
        if !tenant.is_some_and(|t| t.is_operational()) {
            return Err(CredentialCheck::Rejected(Some(user)));
        }

        Ok(user)
    }

    async fn burn_dummy(&self, password: &str) -> Result<(), CredentialCheck> {
        self.passwords
            .verify_dummy(password.to_string())
            .await
            .map(|_| ())
            .map_err(CredentialCheck::Failed)
    }

    async fn is_locked_out(&self, key: &str) -> bool {
        self.failures.get(key).await.unwrap_or(0) >= self.settings.login_max_failures
    }

    async fn note_failure(&self, key: String) {
        self.failures
            .entry(key)
            .and_upsert_with(|current| {
                let count = current.map(|entry| entry.into_value()).unwrap_or(0);
                std::future::ready(count.saturating_add(1))
            })
            .await;
    }

    async fn open_session(
        &self,
        user: &User,
        remember_me: bool,
        client: &ClientMetadata,
    ) -> GatewayResult<IssuedSession> {
        let now = Utc::now();
        let raw = generate_refresh_token();
        let session_id = Uuid::new_v4();

        let record = NewRefreshToken {
            id: Uuid::new_v4(),
            family_id: session_id,
            user_id: user.id,
            tenant_id: user.tenant_id,
            token_hash: hash_token(&raw),
            remember_me,
            issued_at: now,
            expires_at: now + self.refresh_ttl(),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        };
        with_timeout(
            self.retry.attempt_timeout,
            self.store.refresh_tokens.create(record),
        )
        .await?;

        Ok(IssuedSession {
            access_token: self.tokens.issue(user, session_id, now)?,
            expires_in: self.tokens.ttl_secs(),
            refresh_token: raw,
            remember_me,
            session_id,
        })
    }

    /// History is best-effort and must never hold up the response.
    fn record_login(
        &self,
        user_id: Option<Uuid>,
        tenant_id: Option<Uuid>,
        email: &str,
        outcome: LoginOutcome,
        client: &ClientMetadata,
    ) {
        let entry = LoginHistoryEntry {
            user_id,
            tenant_id,
            email: email.to_string(),
            outcome,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            created_at: Utc::now(),
        };
        let repo = self.store.login_history.clone();
        let limit = self.retry.attempt_timeout;

        tokio::spawn(async move {
            if let Err(e) = with_timeout(limit, repo.record(entry)).await {
                warn!(error = %e, outcome = outcome.as_str(), "failed to record login history");
            }
        });
    }

    // ── REFRESH ─────────────────────────────────────────────────

    pub async fn refresh(
        &self,
        presented: Option<&str>,
        client: ClientMetadata,
    ) -> GatewayResult<IssuedSession> {
        let presented = presented
            .map(str::trim)
            .filter(|raw| is_well_formed_refresh_token(raw))
            .ok_or(GatewayError::InvalidToken)?;

        let now = Utc::now();
        let raw = generate_refresh_token();
        let successor = Successor {
            id: Uuid::new_v4(),
            token_hash: hash_token(&raw),
            issued_at: now,
            expires_at: now + self.refresh_ttl(),
            ip_address: client.ip_address,
            user_agent: client.user_agent,
        };

        // Never retried: a retry after a lost commit would read as reuse.
        let outcome = with_timeout(
            self.retry.attempt_timeout,
            self.store
                .refresh_tokens
                .rotate(&hash_token(presented), successor, now),
        )
        .await?;

        let (previous, next) = match outcome {
            RotateOutcome::Rotated {
                previous,
                successor,
            } => (previous, successor),
            RotateOutcome::NotFound => return Err(GatewayError::InvalidToken),
            RotateOutcome::Expired(record) => {
                info!(record_id = %record.id, "expired refresh credential presented");
                return Err(GatewayError::InvalidToken);
            }
            RotateOutcome::Revoked { record, reused } => {
                if reused {
                    warn!(
                        record_id = %record.id,
                        session_id = %record.family_id,
                        user_id = %record.user_id,
                        "refresh credential reused after rotation, revoking session"
                    );
                    if let Err(e) = self.revoke_session(record.family_id, now).await {
                        warn!(error = %e, session_id = %record.family_id, "failed to revoke reused session");
                    }
                }
                return Err(GatewayError::Revoked {
                    reuse_detected: reused,
                });
            }
        };

        let users = self.store.users.clone();
        let user = with_retry(&self.retry, || {
            users.find_by_id(previous.tenant_id, previous.user_id)
        })
        .await?;
        let tenants = self.store.tenants.clone();
        let tenant = with_retry(&self.retry, || tenants.find_by_id(previous.tenant_id)).await?;

        let user = match (user, tenant) {
            (Some(user), Some(tenant)) if user.is_active() && tenant.is_operational() => user,
            _ => {
                info!(session_id = %previous.family_id, "account no longer active, ending session");
                self.revoke_session(previous.family_id, now).await?;
                return Err(GatewayError::Revoked {
                    reuse_detected: false,
                });
            }
        };

        Ok(IssuedSession {
            access_token: self.tokens.issue(&user, next.family_id, now)?,
            expires_in: self.tokens.ttl_secs(),
            refresh_token: raw,
            remember_me: next.remember_me,
            session_id: next.family_id,
        })
    }

    async fn revoke_session(&self, family_id: Uuid, now: DateTime<Utc>) -> GatewayResult<u64> {
        let repo = self.store.refresh_tokens.clone();
        Ok(with_retry(&self.retry, || repo.revoke_family(family_id, now)).await?)
    }

    // ── LOGOUT ──────────────────────────────────────────────────

    /// Ends the session the credential belongs to. Never fails: whatever
    /// happens here, the caller's cookie is cleared.
    pub async fn logout(&self, presented: Option<&str>) {
        let Some(presented) = presented
            .map(str::trim)
            .filter(|raw| is_well_formed_refresh_token(raw))
        else {
            return;
        };

        let hash = hash_token(presented);
        let repo = self.store.refresh_tokens.clone();
        let record = match with_retry(&self.retry, || repo.find_by_hash(&hash)).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "logout lookup failed");
                return;
            }
        };

        match self.revoke_session(record.family_id, Utc::now()).await {
            Ok(revoked) => info!(session_id = %record.family_id, revoked, "logged out"),
            Err(e) => warn!(error = %e, session_id = %record.family_id, "logout revoke failed"),
        }
    }

    // ── AUTHENTICATED OPERATIONS ────────────────────────────────

    pub fn authenticate(&self, access_token: &str) -> GatewayResult<AccessClaims> {
        self.tokens.verify(access_token)
    }

    pub async fn current_user(&self, claims: &AccessClaims) -> GatewayResult<UserProfile> {
        Ok(self.load_active_user(claims).await?.profile())
    }

    /// Returns how many other sessions were signed out.
    pub async fn change_password(
        &self,
        claims: &AccessClaims,
        current_password: &str,
        new_password: &str,
    ) -> GatewayResult<u64> {
        if !is_acceptable_password(new_password) {
            return Err(GatewayError::validation(
                "newPassword must be between 8 and 128 characters",
            ));
        }
        if current_password == new_password {
            return Err(GatewayError::validation(
                "newPassword must differ from the current password",
            ));
        }

        let user = self.load_active_user(claims).await?;
        let valid = self
            .passwords
            .verify(current_password.to_string(), user.password_hash.clone())
            .await?;
        if !valid {
            return Err(GatewayError::InvalidCredentials);
        }

        let hash = self.passwords.hash(new_password.to_string()).await?;
        with_timeout(
            self.retry.attempt_timeout,
            self.store
                .users
                .update_password_hash(user.tenant_id, user.id, &hash),
        )
        .await
        .map_err(|e| match e {
            // Removed since the lookup above: the bearer no longer names anyone.
            StoreError::NotFound => GatewayError::Unauthorized,
            other => other.into(),
        })?;

        let repo = self.store.refresh_tokens.clone();
        let now = Utc::now();
        let revoked = with_retry(&self.retry, || {
            repo.revoke_all_for_user(user.tenant_id, user.id, Some(claims.sid), now)
        })
        .await?;

        info!(user_id = %user.id, revoked, "password changed, other sessions revoked");
        Ok(revoked)
    }

    async fn load_active_user(&self, claims: &AccessClaims) -> GatewayResult<User> {
        let tenant_id = claims
            .tid
            .ok_or_else(|| GatewayError::Internal("access token without tenant".into()))?;
        let users = self.store.users.clone();
        let user = with_retry(&self.retry, || users.find_by_id(tenant_id, claims.sub)).await?;

        user.filter(User::is_active)
            .ok_or(GatewayError::Unauthorized)
    }

    // ── MAINTENANCE ─────────────────────────────────────────────

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> GatewayResult<u64> {
        let repo = self.store.refresh_tokens.clone();
        Ok(with_retry(&self.retry, || repo.purge_expired(now)).await?)
    }

    fn refresh_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.refresh_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(30))
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// The optional tenant id of a login, parsed once so that every spelling of
/// the same id shares one failure counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TenantHint {
    Any,
    Tenant(Uuid),
    Malformed,
}

impl TenantHint {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::Any,
            Some(raw) => Uuid::parse_str(raw).map_or(Self::Malformed, Self::Tenant),
        }
    }

    /// Malformed hints never succeed, so they count against the unscoped key.
    fn throttle_key(self, email: &str) -> String {
        match self {
            Self::Tenant(id) => format!("{id}|{email}"),
            Self::Any | Self::Malformed => format!("*|{email}"),
        }
    }
}

enum CredentialCheck {
    /// Wrong factor of some kind; collapsed to `InvalidCredentials`.
    Rejected(Option<User>),
    Failed(GatewayError),
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PasswordHashConfig;
    use crate::models::Tenant;
    use crate::store::{MemoryStore, StoreResult, UserRepository};
    use std::sync::Arc;

    struct Fixture {
        store: Arc<MemoryStore>,
        sessions: SessionManager,
        user: User,
    }

    fn cheap_passwords() -> Passwords {
        Passwords::new(&PasswordHashConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    fn session_manager(store: CredentialStore) -> SessionManager {
        SessionManager::new(
            store,
            AccessTokenIssuer::new(&[1u8; 32], Duration::from_secs(900)),
            cheap_passwords(),
            RetryConfig::default().with_jitter(false),
            SessionSettings {
                refresh_ttl: Duration::from_secs(86_400),
                login_max_failures: 3,
                login_lockout: Duration::from_secs(60),
            },
        )
    }

    async fn fixture() -> Fixture {
        let passwords = cheap_passwords();
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: "acme".into(),
            status: "active".into(),
            approval_status: "approved".into(),
            created_at: now,
        };
        let user = User {
            id: Uuid::new_v4(),
            tenant_id: tenant.id,
            email: "ada@acme.test".into(),
            name: Some("Ada".into()),
            password_hash: passwords.hash("correct horse".into()).await.unwrap(),
            role: "admin".into(),
            status: "active".into(),
            created_at: now,
            updated_at: now,
        };
        store.insert_tenant(tenant).await;
        store.insert_user(user.clone()).await;

        let sessions = session_manager(CredentialStore::memory(store.clone()));
        Fixture {
            store,
            sessions,
            user,
        }
    }

    fn attempt(password: &str) -> LoginAttempt {
        LoginAttempt {
            email: "  ADA@acme.test ".into(),
            password: password.into(),
            tenant_hint: None,
            remember_me: false,
        }
    }

    #[tokio::test]
    async fn login_binds_session_to_tenant() {
        let f = fixture().await;
        let ok = f
            .sessions
            .login(attempt("correct horse"), ClientMetadata::default())
            .await
            .unwrap();
        assert_eq!(ok.user.tenant_id, f.user.tenant_id.to_string());

        let claims = f.sessions.authenticate(&ok.session.access_token).unwrap();
        assert_eq!(claims.tid, Some(f.user.tenant_id));
        assert_eq!(claims.sid, ok.session.session_id);

        let records = f.store.refresh_tokens_for_user(f.user.id).await;
        assert_eq!(records.len(), 1);
        assert!(!records[0].revoked);
        assert_eq!(records[0].tenant_id, f.user.tenant_id);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let f = fixture().await;
        let wrong = f
            .sessions
            .login(attempt("wrong horse"), ClientMetadata::default())
            .await;
        let mut unknown = attempt("correct horse");
        unknown.email = "nobody@acme.test".into();
        let unknown = f.sessions.login(unknown, ClientMetadata::default()).await;

        assert!(matches!(wrong, Err(GatewayError::InvalidCredentials)));
        assert!(matches!(unknown, Err(GatewayError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn inactive_users_cannot_log_in() {
        let f = fixture().await;
        f.store.set_user_status(f.user.id, "blocked").await;
        let result = f
            .sessions
            .login(attempt("correct horse"), ClientMetadata::default())
            .await;
        assert!(matches!(result, Err(GatewayError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn throttle_blocks_after_repeated_failures() {
        let f = fixture().await;
        for _ in 0..3 {
            let _ = f
                .sessions
                .login(attempt("wrong horse"), ClientMetadata::default())
                .await;
        }
        // Even the right password is refused while locked out.
        let result = f
            .sessions
            .login(attempt("correct horse"), ClientMetadata::default())
            .await;
        assert!(matches!(result, Err(GatewayError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn throttle_ignores_how_the_tenant_id_is_spelled() {
        let f = fixture().await;
        let id = f.user.tenant_id;
        let spellings = [
            format!("  {id} "),
            id.to_string().to_uppercase(),
            format!("{{{id}}}"),
            format!("urn:uuid:{id}"),
            id.simple().to_string(),
        ];
        for spelling in &spellings {
            assert_eq!(
                TenantHint::parse(Some(spelling)).throttle_key("ada@acme.test"),
                format!("{id}|ada@acme.test")
            );
        }

        for spelling in &spellings[..3] {
            let mut wrong = attempt("wrong horse");
            wrong.tenant_hint = Some(spelling.clone());
            let _ = f.sessions.login(wrong, ClientMetadata::default()).await;
        }
        for spelling in &spellings {
            let mut right = attempt("correct horse");
            right.tenant_hint = Some(spelling.clone());
            let result = f.sessions.login(right, ClientMetadata::default()).await;
            assert!(
                matches!(result, Err(GatewayError::InvalidCredentials)),
                "lockout escaped via {spelling:?}"
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_are_all_counted() {
        let f = Arc::new(fixture().await);
        let key = TenantHint::Any.throttle_key("ada@acme.test");

        let tasks: Vec<_> = (0..40)
            .map(|_| {
                let f = Arc::clone(&f);
                let key = key.clone();
                tokio::spawn(async move { f.sessions.note_failure(key).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(f.sessions.failures.get(&key).await, Some(40));
    }

    /// Finds the user, then loses it before the password write lands.
    struct VanishingUsers(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl UserRepository for VanishingUsers {
        async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<User>> {
            UserRepository::find_by_id(&*self.0, tenant_id, id).await
        }

        async fn find_by_email(
            &self,
            email: &str,
            tenant_id: Option<Uuid>,
        ) -> StoreResult<Vec<User>> {
            self.0.find_by_email(email, tenant_id).await
        }

        async fn update_password_hash(&self, _: Uuid, _: Uuid, _: &str) -> StoreResult<()> {
            Err(StoreError::NotFound)
        }
    }

    #[tokio::test]
    async fn password_change_for_a_removed_user_is_unauthorized() {
        let f = fixture().await;
        let session = f
            .sessions
            .login(attempt("correct horse"), ClientMetadata::default())
            .await
            .unwrap()
            .session;
        let claims = f.sessions.authenticate(&session.access_token).unwrap();

        let mut store = CredentialStore::memory(f.store.clone());
        store.users = Arc::new(VanishingUsers(f.store.clone()));
        let result = session_manager(store)
            .change_password(&claims, "correct horse", "battery staple")
            .await;

        assert!(matches!(result, Err(GatewayError::Unauthorized)));
    }

    #[tokio::test]
    async fn refresh_rotates_and_detects_reuse() {
        let f = fixture().await;
        let mut login = attempt("correct horse");
        login.remember_me = true;
        let first = f
            .sessions
            .login(login, ClientMetadata::default())
            .await
            .unwrap()
            .session;

        let second = f
            .sessions
            .refresh(Some(&first.refresh_token), ClientMetadata::default())
            .await
            .unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert!(second.remember_me);
        assert_eq!(second.session_id, first.session_id);

        let replay = f
            .sessions
            .refresh(Some(&first.refresh_token), ClientMetadata::default())
            .await;
        assert!(matches!(
            replay,
            Err(GatewayError::Revoked {
                reuse_detected: true
            })
        ));

        // The whole chain is gone, including the legitimate successor.
        let after = f
            .sessions
            .refresh(Some(&second.refresh_token), ClientMetadata::default())
            .await;
        assert!(matches!(
            after,
            Err(GatewayError::Revoked {
                reuse_detected: false
            })
        ));
    }

    #[tokio::test]
    async fn malformed_or_unknown_refresh_is_invalid_token() {
        let f = fixture().await;
        let unknown = generate_refresh_token();
        for presented in [None, Some("junk"), Some(unknown.as_str())] {
            let result = f
                .sessions
                .refresh(presented, ClientMetadata::default())
                .await;
            assert!(matches!(result, Err(GatewayError::InvalidToken)));
        }
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let f = fixture().await;
        let session = f
            .sessions
            .login(attempt("correct horse"), ClientMetadata::default())
            .await
            .unwrap()
            .session;

        f.sessions.logout(Some(&session.refresh_token)).await;
        f.sessions.logout(Some(&session.refresh_token)).await;
        f.sessions.logout(None).await;

        let result = f
            .sessions
            .refresh(Some(&session.refresh_token), ClientMetadata::default())
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::Revoked {
                reuse_detected: false
            })
        ));
    }

    #[tokio::test]
    async fn password_change_keeps_only_the_callers_session() {
        let f = fixture().await;
        let mine = f
            .sessions
            .login(attempt("correct horse"), ClientMetadata::default())
            .await
            .unwrap()
            .session;
        let other = f
            .sessions
            .login(attempt("correct horse"), ClientMetadata::default())
            .await
            .unwrap()
            .session;

        let claims = f.sessions.authenticate(&mine.access_token).unwrap();
        let revoked = f
            .sessions
            .change_password(&claims, "correct horse", "battery staple")
            .await
            .unwrap();
        assert_eq!(revoked, 1);

        assert!(f
            .sessions
            .refresh(Some(&mine.refresh_token), ClientMetadata::default())
            .await
            .is_ok());
        assert!(f
            .sessions
            .refresh(Some(&other.refresh_token), ClientMetadata::default())
            .await
            .is_err());
        assert!(f
            .sessions
            .login(attempt("battery staple"), ClientMetadata::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn password_change_checks_current_and_policy() {
        let f = fixture().await;
        let session = f
            .sessions
            .login(attempt("correct horse"), ClientMetadata::default())
            .await
            .unwrap()
            .session;
        let claims = f.sessions.authenticate(&session.access_token).unwrap();

        assert!(matches!(
            f.sessions.change_password(&claims, "nope", "battery staple").await,
            Err(GatewayError::InvalidCredentials)
        ));
        assert!(matches!(
            f.sessions.change_password(&claims, "correct horse", "short").await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn tokens_without_tenant_fail_closed() {
        let f = fixture().await;
        let claims = AccessClaims {
            sub: f.user.id,
            tid: None,
            role: "admin".into(),
            sid: Uuid::new_v4(),
            iat: 0,
            exp: i64::MAX,
        };
        assert!(matches!(
            f.sessions.current_user(&claims).await,
            Err(GatewayError::Internal(_))
        ));
    }
}
