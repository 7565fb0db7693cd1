use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::token::AccessClaims;
use crate::AppState;

/// The caller behind a valid `Authorization: Bearer` access credential.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub claims: AccessClaims,
}

impl AuthUser {
    /// A token without a tenant is a defect on our side, never a user
    /// error, so this fails closed as `Internal`.
    pub fn tenant_id(&self) -> GatewayResult<Uuid> {
        self.claims
            .tid
            .ok_or_else(|| GatewayError::Internal("authenticated caller has no tenant".into()))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(GatewayError::Unauthorized)?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(GatewayError::Unauthorized)?;

        let claims = state.sessions.authenticate(token)?;
        Ok(Self { claims })
    }
}
