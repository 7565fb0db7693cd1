use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::models::User;

/// Payload of the access credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    /// Tenant of the subject. Optional on decode so that a token without it
    /// reaches the tenant check and fails there, closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<Uuid>,
    pub role: String,
    /// Login session (refresh family) the token was minted for.
    pub sid: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and verifies HS256 access credentials.
#[derive(Clone)]
pub struct AccessTokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl AccessTokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs()
    }

    pub fn issue(&self, user: &User, session_id: Uuid, now: DateTime<Utc>) -> GatewayResult<String> {
        let claims = AccessClaims {
            sub: user.id,
            tid: Some(user.tenant_id),
            role: user.role.clone(),
            sid: session_id,
            iat: now.timestamp(),
            exp: now.timestamp() + self.ttl.as_secs() as i64,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| GatewayError::Internal(format!("failed to sign access token: {e}")))
    }

    pub fn verify(&self, token: &str) -> GatewayResult<AccessClaims> {
        decode::<AccessClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| GatewayError::InvalidToken)
    }
}

impl std::fmt::Debug for AccessTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenIssuer")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            email: "a@example.com".into(),
            name: None,
            password_hash: String::new(),
            role: "editor".into(),
            status: "active".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn issuer() -> AccessTokenIssuer {
        AccessTokenIssuer::new(&[7u8; 32], Duration::from_secs(900))
    }

    #[test]
    fn issued_tokens_verify() {
        let user = user();
        let sid = Uuid::new_v4();
        let token = issuer().issue(&user, sid, Utc::now()).unwrap();
        let claims = issuer().verify(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.tid, Some(user.tenant_id));
        assert_eq!(claims.sid, sid);
        assert_eq!(claims.role, "editor");
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let token = issuer()
            .issue(&user(), Uuid::new_v4(), Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        assert!(matches!(
            issuer().verify(&token),
            Err(GatewayError::InvalidToken)
        ));
    }

    #[test]
    fn foreign_signatures_are_rejected() {
        let other = AccessTokenIssuer::new(&[8u8; 32], Duration::from_secs(900));
        let token = other.issue(&user(), Uuid::new_v4(), Utc::now()).unwrap();
        assert!(issuer().verify(&token).is_err());
        assert!(issuer().verify("garbage").is_err());
    }
}
