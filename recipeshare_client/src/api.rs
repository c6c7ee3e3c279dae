use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use thiserror::Error;

use crate::storage::{TokenStorage, TOKEN_KEY};

/// Endpoint paths consumed by the stores.
pub mod paths {
    pub const LOGIN: &str = "/api/user/login";
    pub const ME: &str = "/api/user/me";
    pub const REFRESH_PAPRIKA: &str = "/api/user/refresh-paprika";
    pub const CATEGORIES: &str = "/api/paprika/categories";
    pub const RECIPES: &str = "/api/paprika/recipes";
    pub const PARTNERS_ACTIVE: &str = "/api/user/partners/active";
    pub const PARTNERS_PENDING: &str = "/api/user/partners/pending";

    pub fn recipe(id: i64) -> String {
        format!("/api/paprika/recipe/{id}")
    }

    pub fn partner_active(id: i64) -> String {
        format!("/api/user/partners/active/{id}")
    }

    pub fn partner_pending(id: i64) -> String {
        format!("/api/user/partners/pending/{id}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path, None)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path, Some(body))
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path, Some(body))
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path, None)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path, None)
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Error token from an `{"error": "..."}` body, if the server sent one.
    pub fn error_token(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport failed: {0}")]
pub struct TransportError(pub String);

/// The remote collaborator the stores talk to. Non-success statuses are
/// returned to the caller; only transport-level failures are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// HTTP implementation of [`Transport`]. Reads the bearer token from the
/// persistence collaborator on every request so a login or logout in the
/// same process is picked up immediately.
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    storage: Arc<dyn TokenStorage>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, storage: Arc<dyn TokenStorage>) -> Result<Self> {
        let base = sanitize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base,
            client,
            storage,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str, query: &[(String, String)]) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| TransportError(format!("invalid base URL: {err}")))?;
        url.set_path(path.trim_start_matches('/'));
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url(&request.path, &request.query)?;
        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Patch => self.client.patch(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
        };
        if let Some(token) = self.storage.get(TOKEN_KEY) {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| TransportError(err.to_string()))?;
        let status = response.status().as_u16();
        // error responses may carry a non-JSON body; treat that as empty
        let body = response.json().await.unwrap_or(Value::Null);
        Ok(ApiResponse { status, body })
    }
}

fn sanitize_base_url(mut base: String) -> Result<String> {
    if !base.starts_with("http://") && !base.starts_with("https://") {
        base = format!("http://{base}");
    }
    while base.ends_with('/') {
        base.pop();
    }
    let _ = Url::parse(&base).context("invalid base URL")?;
    Ok(base)
}
