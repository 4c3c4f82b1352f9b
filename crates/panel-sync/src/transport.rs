//! HTTP seam between panel clients and the network
//!
//! Clients describe a call as an [`ApiRequest`] and get back the raw status and
//! body. Classifying the response is the endpoint runner's job, so the
//! transport only reports what the wire said, or a network-level failure.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{Result, SyncError, TransientReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
        }
    }

    /// Parse a verb as written in an OpenAPI document.
    pub fn from_schema(verb: &str) -> Option<Self> {
        match verb.to_ascii_lowercase().as_str() {
            "get" => Some(HttpMethod::Get),
            "post" => Some(HttpMethod::Post),
            "put" => Some(HttpMethod::Put),
            "patch" => Some(HttpMethod::Patch),
            _ => None,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    None,
    Json(Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn with_form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. Network failures come back as
    /// [`SyncError::TransientEndpoint`] with a network reason; any HTTP status,
    /// including errors, comes back as a response.
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse>;

    /// Attach or drop the bearer token sent with every later request.
    async fn set_bearer_token(&self, token: Option<String>);

    fn base_url(&self) -> &str;
}

/// reqwest-backed transport with a cookie jar and an optional bearer token.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let config = config.clone().validated()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .cookie_store(true)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url,
            token: Arc::new(RwLock::new(None)),
        })
    }

    fn classify_error(endpoint: String, error: reqwest::Error) -> SyncError {
        if error.is_timeout() {
            SyncError::TransientEndpoint {
                endpoint,
                reason: TransientReason::Timeout,
            }
        } else if error.is_connect() || error.is_request() {
            SyncError::TransientEndpoint {
                endpoint,
                reason: TransientReason::Connect,
            }
        } else {
            SyncError::Http(error)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let endpoint = request.describe();

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Patch => self.client.patch(&url),
        };
        builder = builder.header(reqwest::header::ACCEPT, "application/json");

        if let Some(token) = self.token.read().await.as_ref() {
            builder = builder.bearer_auth(token);
        }

        builder = match request.body {
            RequestBody::None => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Form(fields) => builder.form(&fields),
        };

        debug!(endpoint = %endpoint, "Sending request");
        let response = builder
            .send()
            .await
            .map_err(|e| Self::classify_error(endpoint.clone(), e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Self::classify_error(endpoint.clone(), e))?;
        debug!(endpoint = %endpoint, status = status, "Received response");

        Ok(ApiResponse { status, body })
    }

    async fn set_bearer_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_verbs() {
        assert_eq!(HttpMethod::from_schema("GET"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::from_schema("post"), Some(HttpMethod::Post));
        assert_eq!(HttpMethod::from_schema("delete"), None);
    }

    #[test]
    fn request_description() {
        let request = ApiRequest::post("/api/user").with_json(serde_json::json!({}));
        assert_eq!(request.describe(), "POST /api/user");
    }

    #[test]
    fn transport_rejects_bad_url() {
        assert!(HttpTransport::new(&ClientConfig::new("ftp://panel")).is_err());
        assert!(HttpTransport::new(&ClientConfig::new("http://127.0.0.1:1")).is_ok());
    }
}
