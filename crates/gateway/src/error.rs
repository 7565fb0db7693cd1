use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use docvault_protocol::{ErrorBody, ErrorCode};
use thiserror::Error;

use crate::keys::KeyError;
use crate::storage::StorageError;
use crate::store::StoreError;

/// Every failure a gateway operation can surface to a caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Login failed. Which factor failed is never revealed.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("refresh credential revoked (reuse detected: {reuse_detected})")]
    Revoked { reuse_detected: bool },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("forbidden")]
    Forbidden,

    #[error("authentication required")]
    Unauthorized,

    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidCredentials => ErrorCode::InvalidCredentials,
            Self::InvalidToken => ErrorCode::InvalidToken,
            Self::Revoked {
                reuse_detected: true,
            } => ErrorCode::RefreshReused,
            Self::Revoked {
                reuse_detected: false,
            } => ErrorCode::RefreshRevoked,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Forbidden => ErrorCode::Forbidden,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.code().http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Text safe to hand to the caller.
    fn public_message(&self) -> String {
        match self {
            Self::InvalidCredentials => "Invalid email or password".to_string(),
            Self::InvalidToken => "Session is invalid or has expired".to_string(),
            Self::Revoked { .. } => "Session has been revoked, please sign in again".to_string(),
            Self::Validation(message) => message.clone(),
            Self::Forbidden => "Access denied".to_string(),
            Self::Unauthorized => "Authentication required".to_string(),
            Self::Unavailable(_) => "Service temporarily unavailable".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        Self::Unavailable(format!("credential store: {err}"))
    }
}

impl From<StorageError> for GatewayError {
    fn from(err: StorageError) -> Self {
        Self::Unavailable(format!("object storage: {err}"))
    }
}

impl From<KeyError> for GatewayError {
    fn from(err: KeyError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            Self::Unavailable(detail) => tracing::warn!(error = %detail, "dependency unavailable"),
            Self::Internal(detail) => tracing::error!(error = %detail, "internal error"),
            _ => tracing::debug!(code = %self.code(), "request rejected"),
        }

        let body = ErrorBody::new(self.code(), self.public_message());
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse_is_distinct_from_plain_revocation() {
        assert_eq!(
            GatewayError::Revoked {
                reuse_detected: true
            }
            .code(),
            ErrorCode::RefreshReused
        );
        assert_eq!(
            GatewayError::Revoked {
                reuse_detected: false
            }
            .code(),
            ErrorCode::RefreshRevoked
        );
    }

    #[test]
    fn failed_login_is_not_a_401() {
        assert_eq!(GatewayError::InvalidCredentials.status_code(), StatusCode::OK);
        assert_eq!(GatewayError::InvalidToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            GatewayError::Unavailable("db".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_details_are_not_public() {
        let err = GatewayError::Internal("tenant claim missing for user 42".into());
        assert!(!err.public_message().contains("42"));
        let err = GatewayError::Unavailable("connection refused at 10.0.0.3".into());
        assert!(!err.public_message().contains("10.0.0.3"));
    }
}
