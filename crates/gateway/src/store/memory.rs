//! In-process credential store for development and tests.
//!
//! One mutex guards the whole state, which makes `rotate` trivially atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    LoginHistoryRepository, NewRefreshToken, RefreshTokenRepository, RotateOutcome, StoreError,
    StoreResult, Successor, TenantRepository, UserRepository,
};
use crate::models::{LoginHistoryEntry, RefreshTokenRecord, Tenant, User};

#[derive(Default)]
struct State {
    tenants: HashMap<Uuid, Tenant>,
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
    by_hash: HashMap<String, Uuid>,
    login_history: Vec<LoginHistoryEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_tenant(&self, tenant: Tenant) {
        self.state.lock().await.tenants.insert(tenant.id, tenant);
    }

    pub async fn insert_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn set_user_status(&self, id: Uuid, status: &str) {
        if let Some(user) = self.state.lock().await.users.get_mut(&id) {
            user.status = status.to_string();
        }
    }

    pub async fn login_history(&self) -> Vec<LoginHistoryEntry> {
        self.state.lock().await.login_history.clone()
    }

    pub async fn refresh_tokens_for_user(&self, user_id: Uuid) -> Vec<RefreshTokenRecord> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .refresh_tokens
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.issued_at);
        records
    }
}

fn insert_record(state: &mut State, record: RefreshTokenRecord) {
    state.by_hash.insert(record.token_hash.clone(), record.id);
    state.refresh_tokens.insert(record.id, record);
}

fn revoke_where(
    state: &mut State,
    now: DateTime<Utc>,
    predicate: impl Fn(&RefreshTokenRecord) -> bool,
) -> u64 {
    let mut count = 0;
    for record in state.refresh_tokens.values_mut() {
        if !record.revoked && predicate(record) {
            record.revoked = true;
            record.revoked_at = Some(now);
            count += 1;
        }
    }
    count
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .get(&id)
            .filter(|u| u.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_by_email(&self, email: &str, tenant_id: Option<Uuid>) -> StoreResult<Vec<User>> {
        let state = self.state.lock().await;
        let mut users: Vec<_> = state
            .users
            .values()
            .filter(|u| u.email == email && tenant_id.map_or(true, |t| u.tenant_id == t))
            .cloned()
            .collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn update_password_hash(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        password_hash: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&id)
            .filter(|u| u.tenant_id == tenant_id)
            .ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TenantRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Tenant>> {
        Ok(self.state.lock().await.tenants.get(&id).cloned())
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryStore {
    async fn create(&self, token: NewRefreshToken) -> StoreResult<RefreshTokenRecord> {
        let record = RefreshTokenRecord {
            id: token.id,
            family_id: token.family_id,
            user_id: token.user_id,
            tenant_id: token.tenant_id,
            token_hash: token.token_hash,
            remember_me: token.remember_me,
            issued_at: token.issued_at,
            expires_at: token.expires_at,
            revoked: false,
            revoked_at: None,
            replaced_by: None,
            ip_address: token.ip_address,
            user_agent: token.user_agent,
        };
        let mut state = self.state.lock().await;
        insert_record(&mut state, record.clone());
        Ok(record)
    }

    async fn find_by_hash(&self, token_hash: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .by_hash
            .get(token_hash)
            .and_then(|id| state.refresh_tokens.get(id))
            .cloned())
    }

    async fn rotate(
        &self,
        token_hash: &str,
        successor: Successor,
        now: DateTime<Utc>,
    ) -> StoreResult<RotateOutcome> {
        let mut state = self.state.lock().await;

        let Some(current) = state
            .by_hash
            .get(token_hash)
            .and_then(|id| state.refresh_tokens.get(id))
            .cloned()
        else {
            return Ok(RotateOutcome::NotFound);
        };

        if current.revoked {
            let reused = current.replaced_by.is_some();
            return Ok(RotateOutcome::Revoked {
                record: current,
                reused,
            });
        }

        if current.is_expired(now) {
            let mut expired = current;
            expired.revoked = true;
            expired.revoked_at = Some(now);
            state.refresh_tokens.insert(expired.id, expired.clone());
            return Ok(RotateOutcome::Expired(expired));
        }

        let next = RefreshTokenRecord {
            id: successor.id,
            family_id: current.family_id,
            user_id: current.user_id,
            tenant_id: current.tenant_id,
            token_hash: successor.token_hash,
            remember_me: current.remember_me,
            issued_at: successor.issued_at,
            expires_at: successor.expires_at,
            revoked: false,
            revoked_at: None,
            replaced_by: None,
            ip_address: successor.ip_address,
            user_agent: successor.user_agent,
        };

        let mut previous = current;
        previous.revoked = true;
        previous.revoked_at = Some(now);
        previous.replaced_by = Some(next.id);

        state.refresh_tokens.insert(previous.id, previous.clone());
        insert_record(&mut state, next.clone());

        Ok(RotateOutcome::Rotated {
            previous,
            successor: next,
        })
    }

    async fn revoke_family(&self, family_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        Ok(revoke_where(&mut state, now, |r| r.family_id == family_id))
    }

    async fn revoke_all_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        except_family: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        Ok(revoke_where(&mut state, now, |r| {
            r.tenant_id == tenant_id && r.user_id == user_id && Some(r.family_id) != except_family
        }))
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let expired: Vec<_> = state
            .refresh_tokens
            .values()
            .filter(|r| r.expires_at < cutoff)
            .map(|r| (r.id, r.token_hash.clone()))
            .collect();
        for (id, hash) in &expired {
            state.refresh_tokens.remove(id);
            state.by_hash.remove(hash);
        }
        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl LoginHistoryRepository for MemoryStore {
    async fn record(&self, entry: LoginHistoryEntry) -> StoreResult<()> {
        self.state.lock().await.login_history.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn new_token(hash: &str, now: DateTime<Utc>) -> NewRefreshToken {
        NewRefreshToken {
            id: Uuid::new_v4(),
            family_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            token_hash: hash.to_string(),
            remember_me: true,
            issued_at: now,
            expires_at: now + Duration::days(30),
            ip_address: None,
            user_agent: None,
        }
    }

    fn successor(hash: &str, now: DateTime<Utc>) -> Successor {
        Successor {
            id: Uuid::new_v4(),
            token_hash: hash.to_string(),
            issued_at: now,
            expires_at: now + Duration::days(30),
            ip_address: None,
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn rotation_links_successor_and_keeps_family() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let first = store.create(new_token("h1", now)).await.unwrap();

        let outcome = store.rotate("h1", successor("h2", now), now).await.unwrap();
        let RotateOutcome::Rotated { previous, successor } = outcome else {
            panic!("expected rotation");
        };
        assert_eq!(previous.id, first.id);
        assert_eq!(previous.replaced_by, Some(successor.id));
        assert!(previous.revoked);
        assert_eq!(successor.family_id, first.family_id);
        assert!(successor.remember_me);
        assert!(!successor.revoked);
    }

    #[tokio::test]
    async fn second_rotation_of_same_hash_is_reuse() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.create(new_token("h1", now)).await.unwrap();
        store.rotate("h1", successor("h2", now), now).await.unwrap();

        let again = store.rotate("h1", successor("h3", now), now).await.unwrap();
        assert!(matches!(again, RotateOutcome::Revoked { reused: true, .. }));
        assert!(store.find_by_hash("h3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_rotations_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.create(new_token("h1", now)).await.unwrap();

        let (a, b) = tokio::join!(
            store.rotate("h1", successor("a", now), now),
            store.rotate("h1", successor("b", now), now),
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let wins = outcomes
            .iter()
            .filter(|o| matches!(o, RotateOutcome::Rotated { .. }))
            .count();
        let reuses = outcomes
            .iter()
            .filter(|o| matches!(o, RotateOutcome::Revoked { reused: true, .. }))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(reuses, 1);
    }

    #[tokio::test]
    async fn expired_record_is_revoked_on_presentation() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut token = new_token("old", now - Duration::days(31));
        token.expires_at = now - Duration::days(1);
        store.create(token).await.unwrap();

        let outcome = store.rotate("old", successor("new", now), now).await.unwrap();
        assert!(matches!(outcome, RotateOutcome::Expired(ref r) if r.revoked));
    }

    #[tokio::test]
    async fn revoking_a_family_twice_is_not_an_error() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let record = store.create(new_token("h", now)).await.unwrap();
        assert_eq!(store.revoke_family(record.family_id, now).await.unwrap(), 1);
        assert_eq!(store.revoke_family(record.family_id, now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn revoke_all_spares_the_excepted_family() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let keep = store.create(new_token("keep", now)).await.unwrap();
        let mut other = new_token("other", now);
        other.user_id = keep.user_id;
        other.tenant_id = keep.tenant_id;
        store.create(other).await.unwrap();

        let revoked = store
            .revoke_all_for_user(keep.tenant_id, keep.user_id, Some(keep.family_id), now)
            .await
            .unwrap();
        assert_eq!(revoked, 1);
        assert!(!store.find_by_hash("keep").await.unwrap().unwrap().revoked);
        assert!(store.find_by_hash("other").await.unwrap().unwrap().revoked);
    }
}
