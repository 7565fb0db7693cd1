use std::sync::Arc;

use docvault_protocol::{
    paths, ChangePasswordRequest, ChangePasswordResponse, DirectUploadResponse, ErrorBody,
    ErrorCode, LoginRequest, LoginResponse, RefreshResponse, SuccessResponse, UploadUrlRequest,
    UploadUrlResponse, UserProfile, ValidateKeyRequest, ValidateKeyResponse,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::session::SessionContext;
use crate::transport::{FilePart, HttpRequest, HttpResponse, ReqwestTransport, Transport};

type RefreshFuture = Shared<BoxFuture<'static, Result<(), ClientError>>>;

/// A refresh started for the credential of one session generation.
struct InFlight {
    generation: u64,
    future: RefreshFuture,
}

pub struct GatewayClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionContext>,
    refresh: Mutex<Option<InFlight>>,
}

impl GatewayClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            session: Arc::new(SessionContext::new()),
            refresh: Mutex::new(None),
        }
    }

    pub fn connect(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self::new(Arc::new(ReqwestTransport::new(base_url)?)))
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    // ── AUTH ────────────────────────────────────────────────────

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        tenant_id: Option<&str>,
        remember_me: bool,
    ) -> Result<UserProfile, ClientError> {
        let body = to_body(&LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            tenant_id: tenant_id.map(str::to_string),
            remember_me: Some(remember_me),
        })?;
        let response = self
            .transport
            .execute(HttpRequest::post(paths::LOGIN, body))
            .await?;
        let login: LoginResponse = decode(response)?;

        info!(user_id = %login.user.id, tenant_id = %login.user.tenant_id, "signed in");
        self.session.sign_in(login.access_token, login.user.clone());
        Ok(login.user)
    }

    /// Local state is cleared even when the gateway cannot be reached.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self
            .transport
            .execute(HttpRequest::post(paths::LOGOUT, json!({})))
            .await;
        self.session.clear();
        decode::<SuccessResponse>(result?).map(|_| ())
    }

    pub async fn refresh(&self) -> Result<(), ClientError> {
        self.refresh_once(self.session.generation()).await
    }

    pub async fn current_user(&self) -> Result<UserProfile, ClientError> {
        self.send_json(HttpRequest::get(paths::ME)).await
    }

    /// Returns how many other sessions the gateway signed out.
    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<u64, ClientError> {
        let body = to_body(&ChangePasswordRequest {
            current_password: current_password.to_string(),
            new_password: new_password.to_string(),
        })?;
        let response: ChangePasswordResponse = self
            .send_json(HttpRequest::post(paths::CHANGE_PASSWORD, body))
            .await?;
        Ok(response.revoked_sessions)
    }

    // ── UPLOADS ─────────────────────────────────────────────────

    pub async fn request_upload_url(
        &self,
        file_name: &str,
        content_type: &str,
        file_size: u64,
    ) -> Result<UploadUrlResponse, ClientError> {
        let body = to_body(&UploadUrlRequest {
            file_name: Some(file_name.to_string()),
            content_type: Some(content_type.to_string()),
            file_size: Some(file_size),
        })?;
        self.send_json(HttpRequest::post(paths::UPLOAD_URL, body))
            .await
    }

    /// Sends the bytes through the gateway instead of a presigned URL. The
    /// gateway derives the key; the name here is only a suggestion.
    pub async fn direct_upload(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: impl Into<bytes::Bytes>,
    ) -> Result<DirectUploadResponse, ClientError> {
        let file = FilePart {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            bytes: bytes.into(),
        };
        self.send_json(HttpRequest::upload(paths::DIRECT_UPLOAD, file))
            .await
    }

    /// `Ok(false)` when the key belongs to another tenant or is malformed
    /// in a way the gateway reports as forbidden.
    pub async fn validate_object_key(&self, object_key: &str) -> Result<bool, ClientError> {
        let body = to_body(&ValidateKeyRequest {
            object_key: Some(object_key.to_string()),
        })?;
        match self
            .send_json::<ValidateKeyResponse>(HttpRequest::post(paths::VALIDATE_KEY, body))
            .await
        {
            Ok(response) => Ok(response.valid),
            Err(ClientError::Api {
                code: ErrorCode::Forbidden,
                ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ── AUTHENTICATED TRANSPORT ─────────────────────────────────

    /// Sends `request` with the current access credential. A 401 triggers
    /// the shared refresh and a single replay.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let (token, generation) = self.session.snapshot();
        let token = token.ok_or(ClientError::NotAuthenticated)?;

        let response = self
            .transport
            .execute(request.clone().with_bearer(token))
            .await?;
        if response.status != 401 {
            return Ok(response);
        }

        debug!(path = %request.path, "access credential rejected, refreshing");
        self.refresh_once(generation).await?;

        let token = self
            .session
            .access_token()
            .ok_or(ClientError::SessionExpired(ErrorCode::InvalidToken))?;
        self.transport.execute(request.with_bearer(token)).await
    }

    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
    ) -> Result<T, ClientError> {
        decode(self.send(request).await?)
    }

    /// Joins the refresh already running for `seen_generation`, or starts
    /// one. Returns at once if the credential changed since it was read.
    async fn refresh_once(&self, seen_generation: u64) -> Result<(), ClientError> {
        let future = {
            let mut slot = self.refresh.lock().await;
            if self.session.generation() != seen_generation {
                return Ok(());
            }
            match slot.as_ref() {
                Some(in_flight) if in_flight.generation == seen_generation => {
                    in_flight.future.clone()
                }
                _ => {
                    let future = run_refresh(self.transport.clone(), self.session.clone())
                        .boxed()
                        .shared();
                    *slot = Some(InFlight {
                        generation: seen_generation,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        let result = future.await;
        if result.is_err() {
            // A failed attempt must not be joined by the next 401.
            let mut slot = self.refresh.lock().await;
            if slot
                .as_ref()
                .is_some_and(|in_flight| in_flight.generation == seen_generation)
            {
                *slot = None;
            }
        }
        result
    }
}

async fn run_refresh(
    transport: Arc<dyn Transport>,
    session: Arc<SessionContext>,
) -> Result<(), ClientError> {
    // The refresh credential travels in the cookie jar; the empty body
    // satisfies the JSON fallback.
    let response = transport
        .execute(HttpRequest::post(paths::REFRESH, json!({})))
        .await?;

    match decode::<RefreshResponse>(response) {
        Ok(refreshed) => {
            debug!(expires_in = refreshed.expires_in, "access credential refreshed");
            session.replace_token(refreshed.access_token);
            Ok(())
        }
        Err(err) => match err.code().filter(|code| code.requires_reauthentication()) {
            Some(code) => {
                warn!(%code, "refresh rejected, clearing session");
                session.clear();
                Err(ClientError::SessionExpired(code))
            }
            None => Err(err),
        },
    }
}

fn to_body<T: Serialize>(payload: &T) -> Result<Value, ClientError> {
    serde_json::to_value(payload).map_err(|e| ClientError::Decode(e.to_string()))
}

/// Failures come back either as a non-2xx status or, for login, as a 200
/// with `success: false`.
fn decode<T: DeserializeOwned>(response: HttpResponse) -> Result<T, ClientError> {
    let value: Value = match serde_json::from_slice(&response.body) {
        Ok(value) => value,
        Err(_) if !response.is_success() => {
            return Err(ClientError::Decode(format!(
                "status {} with a non-JSON body",
                response.status
            )));
        }
        Err(e) => return Err(ClientError::Decode(e.to_string())),
    };

    if !response.is_success() || value.get("success") == Some(&Value::Bool(false)) {
        return Err(match serde_json::from_value::<ErrorBody>(value) {
            Ok(body) => ClientError::from_body(response.status, body),
            Err(_) => ClientError::Decode(format!(
                "status {} without an error body",
                response.status
            )),
        });
    }

    serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))
}
