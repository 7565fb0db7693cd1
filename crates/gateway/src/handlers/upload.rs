use std::sync::Arc;

use axum::{
    extract::{multipart::Field, rejection::JsonRejection, Multipart, State},
    Json,
};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use docvault_protocol::{
    DirectUploadResponse, UploadUrlRequest, UploadUrlResponse, ValidateKeyRequest,
    ValidateKeyResponse,
};
use tracing::info;

use crate::error::{GatewayError, GatewayResult};
use crate::extractors::AuthUser;
use crate::grant::is_valid_content_type;
use crate::retry::with_retry;
use crate::AppState;

const FILE_FIELD: &str = "file";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub async fn upload_url(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<UploadUrlRequest>, JsonRejection>,
) -> GatewayResult<Json<UploadUrlResponse>> {
    let tenant_id = user.tenant_id()?;
    let Json(request) = payload.map_err(|r| GatewayError::validation(r.body_text()))?;

    let grant = state
        .uploads
        .issue_upload_grant(tenant_id, &request, Utc::now())?;
    Ok(Json(grant.into_response()))
}

pub async fn validate_key(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<ValidateKeyRequest>, JsonRejection>,
) -> GatewayResult<Json<ValidateKeyResponse>> {
    let tenant_id = user.tenant_id()?;
    let Json(request) = payload.map_err(|r| GatewayError::validation(r.body_text()))?;

    state
        .uploads
        .validate_upload(request.object_key.as_deref(), tenant_id)?;
    Ok(Json(ValidateKeyResponse { valid: true }))
}

pub async fn direct_upload(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    mut multipart: Multipart,
) -> GatewayResult<Json<DirectUploadResponse>> {
    let tenant_id = user.tenant_id()?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::Validation(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::validation("fileName is required"))?;
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        if !is_valid_content_type(&content_type) {
            return Err(GatewayError::validation("contentType is malformed"));
        }

        // Key first: a bad name is rejected before any byte is buffered.
        let key = state.uploads.direct_upload_key(tenant_id, &file_name)?;
        let body = read_bounded(field, state.uploads.max_upload_bytes()).await?;
        let size = body.len() as u64;

        let storage = state.storage.clone();
        with_retry(&state.storage_retry, || {
            storage.put_object(&key, &content_type, body.clone())
        })
        .await?;

        info!(%tenant_id, size, backend = state.storage.name(), "direct upload stored");

        let stored_name = key
            .as_str()
            .rsplit('/')
            .next()
            .and_then(|last| last.split_once('-'))
            .map(|(_, name)| name.to_string())
            .unwrap_or_default();

        return Ok(Json(DirectUploadResponse {
            object_key: key.into_string(),
            file_name: stored_name,
            size,
            mime_type: content_type,
        }));
    }

    Err(GatewayError::validation("multipart field 'file' is required"))
}

/// Stops reading the moment the running total passes `max`.
async fn read_bounded(mut field: Field<'_>, max: u64) -> GatewayResult<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| GatewayError::Validation(format!("upload interrupted: {e}")))?
    {
        if (buffer.len() + chunk.len()) as u64 > max {
            return Err(GatewayError::Validation(format!(
                "file exceeds the maximum of {max} bytes"
            )));
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}
