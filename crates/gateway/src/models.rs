use chrono::{DateTime, Utc};
use docvault_protocol::UserProfile;
use uuid::Uuid;

// ── STATUS ENUMS ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Inactive,
    Blocked,
    /// Terminal. Users are never hard-deleted while audit rows reference them.
    Removed,
}

impl UserStatus {
    /// Unknown values fail closed.
    pub fn parse(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "blocked" => Self::Blocked,
            "removed" => Self::Removed,
            _ => Self::Inactive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantStatus {
    Active,
    Suspended,
    Removed,
}

impl TenantStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "removed" => Self::Removed,
            _ => Self::Suspended,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

// ── ROWS ────────────────────────────────────────────────────────

#[derive(Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn status(&self) -> UserStatus {
        UserStatus::parse(&self.status)
    }

    pub fn is_active(&self) -> bool {
        self.status() == UserStatus::Active
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.to_string(),
            tenant_id: self.tenant_id.to_string(),
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
        }
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("role", &self.role)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub approval_status: String,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// Only active, approved tenants may sign users in.
    pub fn is_operational(&self) -> bool {
        TenantStatus::parse(&self.status) == TenantStatus::Active
            && ApprovalStatus::parse(&self.approval_status) == ApprovalStatus::Approved
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    /// The login session this record belongs to. Rotation keeps it.
    pub family_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub token_hash: String,
    pub remember_me: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    Failed,
    Blocked,
}

impl LoginOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Blocked => "BLOCKED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginHistoryEntry {
    pub user_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub outcome: LoginOutcome,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Where a request came from, for login history and refresh records.
#[derive(Debug, Clone, Default)]
pub struct ClientMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expires_at: DateTime<Utc>) -> RefreshTokenRecord {
        let now = Utc::now();
        RefreshTokenRecord {
            id: Uuid::new_v4(),
            family_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            token_hash: "h".into(),
            remember_me: false,
            issued_at: now,
            expires_at,
            revoked: false,
            revoked_at: None,
            replaced_by: None,
            ip_address: None,
            user_agent: None,
        }
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        assert!(!record(now + Duration::seconds(1)).is_expired(now));
        assert!(record(now).is_expired(now));
        assert!(record(now - Duration::days(1)).is_expired(now));
    }

    #[test]
    fn unknown_statuses_fail_closed() {
        assert_eq!(UserStatus::parse("ACTIVE"), UserStatus::Inactive);
        assert_eq!(UserStatus::parse("weird"), UserStatus::Inactive);
        assert_eq!(TenantStatus::parse(""), TenantStatus::Suspended);
        assert_eq!(ApprovalStatus::parse("maybe"), ApprovalStatus::Pending);
    }

    #[test]
    fn tenant_needs_active_and_approved() {
        let mut tenant = Tenant {
            id: Uuid::new_v4(),
            name: "acme".into(),
            status: "active".into(),
            approval_status: "pending".into(),
            created_at: Utc::now(),
        };
        assert!(!tenant.is_operational());
        tenant.approval_status = "approved".into();
        assert!(tenant.is_operational());
        tenant.status = "suspended".into();
        assert!(!tenant.is_operational());
    }
}
