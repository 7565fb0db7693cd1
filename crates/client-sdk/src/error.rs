use docvault_protocol::{ErrorBody, ErrorCode};
use thiserror::Error;

/// Everything a gateway call can fail with. `Clone` so one refresh outcome
/// can be handed to every request that waited on it.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    /// The session cannot be recovered; the user has to log in again.
    #[error("session expired ({0}), please sign in again")]
    SessionExpired(ErrorCode),

    #[error("not signed in")]
    NotAuthenticated,

    #[error("gateway error {code} (status {status}): {message}")]
    Api {
        status: u16,
        code: ErrorCode,
        message: String,
    },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    pub(crate) fn from_body(status: u16, body: ErrorBody) -> Self {
        match body.code {
            ErrorCode::InvalidCredentials => Self::InvalidCredentials,
            code => Self::Api {
                status,
                code,
                message: body.message,
            },
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Api { code, .. } | Self::SessionExpired(code) => Some(*code),
            Self::InvalidCredentials => Some(ErrorCode::InvalidCredentials),
            _ => None,
        }
    }

    pub fn requires_login(&self) -> bool {
        matches!(self, Self::SessionExpired(_) | Self::NotAuthenticated)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
