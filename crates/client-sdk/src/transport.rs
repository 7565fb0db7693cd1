use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde_json::Value;

use crate::error::ClientError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const FILE_FIELD: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A file sent as the `file` field of a multipart form.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
    pub file: Option<FilePart>,
    pub bearer: Option<String>,
}

impl HttpRequest {
    pub fn get(path: &str) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.to_string(),
            body: None,
            file: None,
            bearer: None,
        }
    }

    pub fn post(path: &str, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.to_string(),
            body: Some(body),
            file: None,
            bearer: None,
        }
    }

    pub fn upload(path: &str, file: FilePart) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.to_string(),
            body: None,
            file: Some(file),
            bearer: None,
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Moves one request to the gateway. The refresh cookie is the transport's
/// business; callers only ever see the access credential.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestTransport {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Transport(format!("invalid gateway url: {e}")))?;
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let url = self
            .base_url
            .join(&request.path)
            .map_err(|e| ClientError::Transport(format!("invalid path {}: {e}", request.path)))?;

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        };
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(file) = request.file {
            let part = Part::stream(file.bytes)
                .file_name(file.file_name)
                .mime_str(&file.content_type)?;
            builder = builder.multipart(Form::new().part(FILE_FIELD, part));
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(HttpResponse { status, body })
    }
}
