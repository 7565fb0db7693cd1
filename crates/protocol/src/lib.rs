use serde::{Deserialize, Serialize};

/// Name of the HTTP-only cookie carrying the refresh credential.
pub const REFRESH_COOKIE: &str = "docvault_refresh";

pub mod paths {
    pub const LOGIN: &str = "/auth/login";
    pub const REFRESH: &str = "/auth/refresh";
    pub const LOGOUT: &str = "/auth/logout";
    pub const ME: &str = "/auth/me";
    pub const CHANGE_PASSWORD: &str = "/auth/change-password";
    pub const UPLOAD_URL: &str = "/document-upload/upload-url";
    pub const VALIDATE_KEY: &str = "/document-upload/validate";
    pub const DIRECT_UPLOAD: &str = "/document-upload/direct-upload";
}

// ── ERROR ENVELOPE ──────────────────────────────────────────────

/// Closed set of error kinds a client can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidCredentials,
    InvalidToken,
    RefreshRevoked,
    RefreshReused,
    ValidationError,
    Forbidden,
    Unauthorized,
    Unavailable,
    InternalError,
}

impl ErrorCode {
    /// HTTP status the gateway answers with for this code.
    ///
    /// `InvalidCredentials` is deliberately 200: a failed login must not look
    /// like an expired access credential to clients that refresh on 401.
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidCredentials => 200,
            Self::InvalidToken | Self::RefreshRevoked | Self::RefreshReused | Self::Unauthorized => {
                401
            }
            Self::ValidationError => 400,
            Self::Forbidden => 403,
            Self::Unavailable => 503,
            Self::InternalError => 500,
        }
    }

    /// True when the only way forward is a fresh login.
    pub fn requires_reauthentication(self) -> bool {
        matches!(
            self,
            Self::InvalidToken | Self::RefreshRevoked | Self::RefreshReused
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::RefreshRevoked => "REFRESH_REVOKED",
            Self::RefreshReused => "REFRESH_REUSED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Forbidden => "FORBIDDEN",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Unavailable => "UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            message: message.into(),
        }
    }
}

// ── AUTH PAYLOADS ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remember_me: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub tenant_id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub access_token: String,
    /// Access credential lifetime in seconds.
    pub expires_in: u64,
    pub user: UserProfile,
}

/// Body fallback for clients that cannot send the refresh cookie.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub success: bool,
    pub access_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordResponse {
    pub success: bool,
    /// Number of other login sessions that were signed out.
    pub revoked_sessions: u64,
}

// ── UPLOAD PAYLOADS ─────────────────────────────────────────────

/// Every field is optional on the wire so that "missing" can be told apart
/// from an explicit zero `fileSize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    pub upload_url: String,
    pub key: String,
    pub file_name: String,
    pub method: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateKeyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateKeyResponse {
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectUploadResponse {
    pub object_key: String,
    pub file_name: String,
    pub size: u64,
    pub mime_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_screaming_snake() {
        let body = ErrorBody::new(ErrorCode::InvalidCredentials, "Invalid email or password");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "INVALID_CREDENTIALS");

        let parsed: ErrorCode = serde_json::from_str("\"REFRESH_REUSED\"").unwrap();
        assert_eq!(parsed, ErrorCode::RefreshReused);
        assert_eq!(parsed.as_str(), "REFRESH_REUSED");
    }

    #[test]
    fn login_failure_is_not_a_401() {
        assert_eq!(ErrorCode::InvalidCredentials.http_status(), 200);
        assert_eq!(ErrorCode::InvalidToken.http_status(), 401);
        assert_eq!(ErrorCode::Forbidden.http_status(), 403);
        assert_eq!(ErrorCode::Unavailable.http_status(), 503);
    }

    #[test]
    fn reuse_always_forces_relogin() {
        assert!(ErrorCode::RefreshReused.requires_reauthentication());
        assert!(ErrorCode::RefreshRevoked.requires_reauthentication());
        assert!(!ErrorCode::Unavailable.requires_reauthentication());
        assert!(!ErrorCode::Unauthorized.requires_reauthentication());
    }

    #[test]
    fn upload_request_distinguishes_zero_from_missing() {
        let zero: UploadUrlRequest = serde_json::from_str(
            r#"{"fileName":"a.pdf","contentType":"application/pdf","fileSize":0}"#,
        )
        .unwrap();
        assert_eq!(zero.file_size, Some(0));

        let missing: UploadUrlRequest =
            serde_json::from_str(r#"{"fileName":"a.pdf","contentType":"application/pdf"}"#)
                .unwrap();
        assert_eq!(missing.file_size, None);
    }

    #[test]
    fn login_request_uses_camel_case() {
        let req: LoginRequest = serde_json::from_str(
            r#"{"email":"a@b.io","password":"pw","tenantId":"t1","rememberMe":true}"#,
        )
        .unwrap();
        assert_eq!(req.tenant_id.as_deref(), Some("t1"));
        assert_eq!(req.remember_me, Some(true));
    }
}
