//! Tenant-namespaced object keys.
//!
//! Layout: `{tenantId}/documents/{documentId}/{token}-{fileName}`. The first
//! segment is the only thing binding a stored object to its tenant, so keys
//! coming back from callers are parsed structurally before that segment is
//! compared.

use thiserror::Error;
use uuid::Uuid;

use crate::crypto::generate_unique_token;

pub const MAX_FILE_NAME_LEN: usize = 128;
pub const MAX_KEY_LEN: usize = 1024;
const FALLBACK_FILE_NAME: &str = "file";
const DOCUMENTS_SEGMENT: &str = "documents";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("fileName is required")]
    EmptyFileName,

    #[error("fileName must not contain null bytes")]
    NullByte,

    #[error("object key is malformed: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Structural validation of a caller-supplied key. Says nothing about
    /// ownership.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        if raw.is_empty() {
            return Err(KeyError::Malformed("empty"));
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(KeyError::Malformed("too long"));
        }
        if raw.starts_with('/') {
            return Err(KeyError::Malformed("leading slash"));
        }
        if raw.contains('\\') || raw.contains('\0') || raw.chars().any(char::is_control) {
            return Err(KeyError::Malformed("forbidden character"));
        }

        let mut segments = 0;
        for segment in raw.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(KeyError::Malformed("invalid path segment"));
            }
            segments += 1;
        }
        if segments < 2 {
            return Err(KeyError::Malformed("missing tenant prefix"));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn tenant_segment(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    /// Exact string match of the leading segment against the tenant id.
    pub fn belongs_to(&self, tenant_id: Uuid) -> bool {
        self.tenant_segment() == tenant_id.to_string()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduce an untrusted file name to a safe final key segment.
pub fn sanitize_file_name(raw: &str) -> Result<String, KeyError> {
    if raw.contains('\0') {
        return Err(KeyError::NullByte);
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(KeyError::EmptyFileName);
    }

    // Drop any directory part, whichever separator the client used.
    let base = trimmed
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or_default();

    let mut cleaned = String::with_capacity(base.len());
    for c in base.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            cleaned.push(c);
        } else if !cleaned.ends_with('_') {
            cleaned.push('_');
        }
    }

    let cleaned = cleaned.trim_start_matches('.');
    let cleaned = truncate_keeping_extension(cleaned, MAX_FILE_NAME_LEN);

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_' || c == '.') {
        return Ok(FALLBACK_FILE_NAME.to_string());
    }
    Ok(cleaned)
}

fn truncate_keeping_extension(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if name.len() - dot <= 16 && dot > 0 => {
            let ext = &name[dot..];
            format!("{}{}", &name[..max - ext.len()], ext)
        }
        _ => name[..max].to_string(),
    }
}

/// Build the key for a new upload. Every call draws a fresh uniqueness
/// token, so two uploads never share a key even for the same document.
pub fn derive_object_key(
    tenant_id: Uuid,
    file_name: &str,
    document_id: Uuid,
) -> Result<ObjectKey, KeyError> {
    derive_object_key_with_token(tenant_id, file_name, document_id, &generate_unique_token())
}

pub fn derive_object_key_with_token(
    tenant_id: Uuid,
    file_name: &str,
    document_id: Uuid,
    token: &str,
) -> Result<ObjectKey, KeyError> {
    let name = sanitize_file_name(file_name)?;
    Ok(ObjectKey(format!(
        "{tenant_id}/{DOCUMENTS_SEGMENT}/{document_id}/{token}-{name}"
    )))
}

/// Any parse failure counts as "not yours".
pub fn validate_object_key_ownership(raw_key: &str, tenant_id: Uuid) -> bool {
    match ObjectKey::parse(raw_key) {
        Ok(key) => key.belongs_to(tenant_id),
        Err(_) => false,
    }
}
