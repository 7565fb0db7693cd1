//! Upload grants: AWS Signature V4 query-string presigned PUT URLs.
//!
//! The signature covers method, bucket + key, `content-length`,
//! `content-type`, host and expiry, so the storage backend enforces the
//! declared size and type for us. The client never sees a storage secret.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use docvault_protocol::{UploadUrlRequest, UploadUrlResponse};
use reqwest::Url;
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::{StorageConfig, MAX_UPLOAD_URL_TTL_MINUTES};
use crate::crypto::{constant_time_eq, hmac_sha256, sha256_hex};
use crate::error::{GatewayError, GatewayResult};
use crate::keys::{self, ObjectKey};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const SIGNED_HEADERS: &str = "content-length;content-type;host";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
/// How far in the future a signing time may lie, as S3 allows.
const MAX_CLOCK_SKEW_SECS: i64 = 15 * 60;
/// Signing endpoint used when no real backend is configured.
const LOCAL_ENDPOINT: &str = "http://storage.localhost";

pub const UPLOAD_METHOD: &str = "PUT";

// ── PRESIGNER ───────────────────────────────────────────────────

#[derive(Clone)]
pub struct StorageCredentials {
    pub endpoint: Url,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: Zeroizing<String>,
}

impl StorageCredentials {
    pub fn from_config(config: &StorageConfig) -> GatewayResult<Self> {
        let endpoint = match &config.endpoint {
            Some(url) => url.clone(),
            None => Url::parse(LOCAL_ENDPOINT)
                .map_err(|e| GatewayError::Internal(format!("bad local endpoint: {e}")))?,
        };
        Ok(Self {
            endpoint,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
        })
    }
}

impl std::fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("endpoint", &self.endpoint.as_str())
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Why the backend refused a presigned request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresignError {
    #[error("presigned url is malformed: {0}")]
    Malformed(&'static str),

    #[error("signature does not match")]
    SignatureMismatch,

    #[error("request has expired")]
    Expired,

    #[error("request is not yet valid")]
    NotYetValid,
}

/// A PUT the backend has accepted as correctly signed and still valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPut {
    pub key: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Presigner {
    credentials: StorageCredentials,
}

impl Presigner {
    pub fn new(credentials: StorageCredentials) -> Self {
        Self { credentials }
    }

    pub fn presign_put(
        &self,
        key: &ObjectKey,
        content_type: &str,
        content_length: u64,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> GatewayResult<Url> {
        let host = host_header(&self.credentials.endpoint)
            .ok_or_else(|| GatewayError::Internal("storage endpoint has no host".into()))?;
        let amz_date = now.format(AMZ_DATE_FORMAT).to_string();
        let date = &amz_date[..8];
        let credential = format!(
            "{}/{}/{}/{SERVICE}/aws4_request",
            self.credentials.access_key_id, date, self.credentials.region
        );
        let path = format!(
            "{}/{}/{}",
            self.credentials.endpoint.path().trim_end_matches('/'),
            urlencoding::encode(&self.credentials.bucket),
            encode_path(key.as_str())
        );

        let mut params = vec![
            ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
            ("X-Amz-Credential".to_string(), credential),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), expires_in.as_secs().to_string()),
            ("X-Amz-SignedHeaders".to_string(), SIGNED_HEADERS.to_string()),
        ];
        let query = canonical_query(&mut params);

        let signature = self.signature(
            UPLOAD_METHOD,
            &path,
            &query,
            content_length,
            content_type,
            &host,
            &amz_date,
        );

        let mut url = self.credentials.endpoint.clone();
        url.set_path(&path);
        url.set_query(Some(&format!("{query}&X-Amz-Signature={signature}")));
        Ok(url)
    }

    /// The storage side of the protocol: accept `method url` with these
    /// headers at `now`, or say why not.
    pub fn verify_put(
        &self,
        method: &str,
        url: &str,
        content_type: &str,
        content_length: u64,
        now: DateTime<Utc>,
    ) -> Result<VerifiedPut, PresignError> {
        if method != UPLOAD_METHOD {
            return Err(PresignError::SignatureMismatch);
        }
        let url = Url::parse(url).map_err(|_| PresignError::Malformed("unparseable url"))?;
        let host = host_header(&url).ok_or(PresignError::Malformed("missing host"))?;

        let mut params = Vec::new();
        let mut signature = None;
        for (name, value) in url.query_pairs() {
            if name == "X-Amz-Signature" {
                signature = Some(value.into_owned());
            } else {
                params.push((name.into_owned(), value.into_owned()));
            }
        }
        let signature = signature.ok_or(PresignError::Malformed("missing signature"))?;

        let param = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        if param("X-Amz-Algorithm").as_deref() != Some(ALGORITHM) {
            return Err(PresignError::Malformed("unsupported algorithm"));
        }
        if param("X-Amz-SignedHeaders").as_deref() != Some(SIGNED_HEADERS) {
            return Err(PresignError::Malformed("unexpected signed headers"));
        }
        let amz_date = param("X-Amz-Date").ok_or(PresignError::Malformed("missing date"))?;
        let signed_at = NaiveDateTime::parse_from_str(&amz_date, AMZ_DATE_FORMAT)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .map_err(|_| PresignError::Malformed("bad date"))?;
        let expires_secs: i64 = param("X-Amz-Expires")
            .and_then(|v| v.parse().ok())
            .filter(|secs| (1..=7 * 24 * 60 * 60).contains(secs))
            .ok_or(PresignError::Malformed("bad expiry"))?;
        let expected_credential = format!(
            "{}/{}/{}/{SERVICE}/aws4_request",
            self.credentials.access_key_id,
            &amz_date[..8],
            self.credentials.region
        );
        if param("X-Amz-Credential").as_deref() != Some(expected_credential.as_str()) {
            return Err(PresignError::SignatureMismatch);
        }

        let query = canonical_query(&mut params);
        let expected = self.signature(
            UPLOAD_METHOD,
            url.path(),
            &query,
            content_length,
            content_type,
            &host,
            &amz_date,
        );
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(PresignError::SignatureMismatch);
        }

        if signed_at > now + chrono::Duration::seconds(MAX_CLOCK_SKEW_SECS) {
            return Err(PresignError::NotYetValid);
        }
        let expires_at = signed_at + chrono::Duration::seconds(expires_secs);
        if now > expires_at {
            return Err(PresignError::Expired);
        }

        let bucket_prefix = format!(
            "{}/{}/",
            self.credentials.endpoint.path().trim_end_matches('/'),
            urlencoding::encode(&self.credentials.bucket)
        );
        let key = url
            .path()
            .strip_prefix(&bucket_prefix)
            .ok_or(PresignError::Malformed("wrong bucket"))?;

        Ok(VerifiedPut {
            key: urlencoding::decode(key)
                .map_err(|_| PresignError::Malformed("bad key encoding"))?
                .into_owned(),
            expires_at,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn signature(
        &self,
        method: &str,
        canonical_uri: &str,
        canonical_query: &str,
        content_length: u64,
        content_type: &str,
        host: &str,
        amz_date: &str,
    ) -> String {
        let date = &amz_date[..8];
        let canonical_headers = format!(
            "content-length:{content_length}\ncontent-type:{}\nhost:{host}\n",
            content_type.trim()
        );
        let canonical_request = format!(
            "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{SIGNED_HEADERS}\n{UNSIGNED_PAYLOAD}"
        );
        let scope = format!("{date}/{}/{SERVICE}/aws4_request", self.credentials.region);
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );

        let secret = Zeroizing::new(format!("AWS4{}", self.credentials.secret_access_key.as_str()));
        let k_date = hmac_sha256(secret.as_bytes(), date.as_bytes());
        let k_region = hmac_sha256(&k_date, self.credentials.region.as_bytes());
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");

        hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()))
    }
}

fn host_header(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn canonical_query(params: &mut [(String, String)]) -> String {
    params.sort();
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// SigV4 path encoding: each segment is escaped, the separators are kept.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

// ── GRANTOR ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct UploadGrant {
    pub url: Url,
    pub key: ObjectKey,
    pub document_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub content_length: u64,
    pub expires_in: Duration,
}

impl UploadGrant {
    pub fn into_response(self) -> UploadUrlResponse {
        UploadUrlResponse {
            upload_url: self.url.to_string(),
            key: self.key.into_string(),
            file_name: self.file_name,
            method: UPLOAD_METHOD.to_string(),
            expires_in: self.expires_in.as_secs(),
        }
    }
}

/// Issues upload grants and checks keys coming back from callers.
#[derive(Debug, Clone)]
pub struct UploadGrantor {
    presigner: std::sync::Arc<Presigner>,
    ttl: Duration,
    max_upload_bytes: u64,
}

impl UploadGrantor {
    pub fn new(presigner: std::sync::Arc<Presigner>, ttl: Duration, max_upload_bytes: u64) -> Self {
        let cap = Duration::from_secs(MAX_UPLOAD_URL_TTL_MINUTES * 60);
        Self {
            presigner,
            ttl: ttl.min(cap),
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn issue_upload_grant(
        &self,
        tenant_id: Uuid,
        request: &UploadUrlRequest,
        now: DateTime<Utc>,
    ) -> GatewayResult<UploadGrant> {
        let file_name = request
            .file_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| GatewayError::validation("fileName is required"))?;
        let content_type = request
            .content_type
            .as_deref()
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .ok_or_else(|| GatewayError::validation("contentType is required"))?;
        if !is_valid_content_type(content_type) {
            return Err(GatewayError::validation("contentType is malformed"));
        }
        // Zero is a legitimate size; only absence is an error.
        let size = request
            .file_size
            .ok_or_else(|| GatewayError::validation("fileSize is required"))?;
        self.check_size(size)?;

        let document_id = Uuid::new_v4();
        let key = keys::derive_object_key(tenant_id, file_name, document_id)?;
        let url = self
            .presigner
            .presign_put(&key, content_type, size, self.ttl, now)?;
        let sanitized = key
            .as_str()
            .rsplit('/')
            .next()
            .and_then(|last| last.split_once('-'))
            .map(|(_, name)| name.to_string())
            .unwrap_or_default();

        tracing::info!(%tenant_id, %document_id, size, "upload grant issued");

        Ok(UploadGrant {
            url,
            key,
            document_id,
            file_name: sanitized,
            content_type: content_type.to_string(),
            content_length: size,
            expires_in: self.ttl,
        })
    }

    /// `Forbidden` for anything that is not demonstrably the caller's.
    /// Existence in storage is not checked.
    pub fn validate_upload(&self, object_key: Option<&str>, tenant_id: Uuid) -> GatewayResult<()> {
        let key = object_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| GatewayError::validation("objectKey is required"))?;

        if keys::validate_object_key_ownership(key, tenant_id) {
            Ok(())
        } else {
            tracing::warn!(%tenant_id, "object key rejected for tenant");
            Err(GatewayError::Forbidden)
        }
    }

    /// Server-side key for a relayed upload; never taken from the client.
    pub fn direct_upload_key(&self, tenant_id: Uuid, file_name: &str) -> GatewayResult<ObjectKey> {
        let key = keys::derive_object_key(tenant_id, file_name, Uuid::new_v4())?;
        if !key.belongs_to(tenant_id) {
            return Err(GatewayError::Internal("derived key escaped its tenant".into()));
        }
        Ok(key)
    }

    pub fn check_size(&self, size: u64) -> GatewayResult<()> {
        if size > self.max_upload_bytes {
            return Err(GatewayError::Validation(format!(
                "fileSize exceeds the maximum of {} bytes",
                self.max_upload_bytes
            )));
        }
        Ok(())
    }
}

/// `type/subtype` with optional parameters, printable ASCII only.
pub fn is_valid_content_type(value: &str) -> bool {
    if value.len() > 255 || !value.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        return false;
    }
    let essence = value.split(';').next().unwrap_or_default().trim();
    match essence.split_once('/') {
        Some((kind, sub)) => {
            let token = |s: &str| {
                !s.is_empty()
                    && s.bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b"!#$&-^_.+".contains(&b))
            };
            token(kind) && token(sub)
        }
        None => false,
    }
}
