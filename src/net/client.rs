//! HTTP gateway to the session backend.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::envelope;
use crate::config::Config;
use crate::error::TransportError;

/// Default user agent.
pub const USER_AGENT: &str = concat!("authsession/", env!("CARGO_PKG_VERSION"));

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default versioned API prefix.
pub const API_PREFIX: &str = "/api/v1";

/// Correlation header attached to every request.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// =============================================================================
// Responses
// =============================================================================

/// Decoded body of a successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Text(String),
    Empty,
}

/// A 2xx response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl ApiResponse {
    /// Decode the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        let decoded = match &self.body {
            ResponseBody::Json(value) => serde_json::from_value(value.clone()),
            ResponseBody::Text(text) => serde_json::from_str(text),
            ResponseBody::Empty => serde_json::from_value(serde_json::Value::Null),
        };
        decoded.map_err(|e| TransportError::Decode(e.to_string()))
    }
}

// =============================================================================
// Requests
// =============================================================================

/// A single request to send through [`HttpGateway::send`].
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    headers: Vec<(String, String)>,
    bearer: Option<String>,
    timeout: Option<Duration>,
    versioned: bool,
    invalid: Option<String>,
}

impl GatewayRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
            bearer: None,
            timeout: None,
            versioned: true,
            invalid: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => self.body = Some(value),
            Err(e) => self.invalid = Some(format!("unserializable body: {e}")),
        }
        self
    }

    /// Add a header. Overrides gateway defaults with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Use this bearer token instead of the gateway's current one.
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Override the gateway timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolve against the origin instead of the versioned API prefix.
    pub fn unversioned(mut self) -> Self {
        self.versioned = false;
        self
    }
}

// =============================================================================
// HttpGateway
// =============================================================================

/// Authenticated HTTP client for the backend API.
///
/// Holds the current bearer token; every request carries it unless the
/// request supplies its own.
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_prefix: String,
    timeout: Duration,
    default_headers: HeaderMap,
    bearer: RwLock<Option<String>>,
}

impl HttpGateway {
    /// Create a builder.
    pub fn builder(base_url: impl Into<String>) -> HttpGatewayBuilder {
        HttpGatewayBuilder::new(base_url)
    }

    /// Build a gateway from the `[api]` configuration.
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        Self::builder(config.base_url())
            .api_prefix(&config.api.version_prefix)
            .timeout(Duration::from_millis(config.api.timeout_ms))
            .connect_timeout(Duration::from_millis(config.api.connect_timeout_ms))
            .build()
    }

    /// The origin requests resolve against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_bearer(&self, token: impl Into<String>) {
        *self.bearer.write() = Some(token.into());
    }

    pub fn clear_bearer(&self) {
        *self.bearer.write() = None;
    }

    /// The current bearer token.
    pub fn bearer(&self) -> Option<String> {
        self.bearer.read().clone()
    }

    /// Full URL for a path.
    pub fn url_for(&self, path: &str, versioned: bool) -> Result<Url, TransportError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).map_err(|e| TransportError::InvalidRequest(e.to_string()));
        }
        let prefix = if versioned {
            self.api_prefix.as_str()
        } else {
            ""
        };
        let joined = format!(
            "{}{}/{}",
            self.base_url,
            prefix,
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| TransportError::InvalidRequest(e.to_string()))
    }

    /// Plain request form: method, path, optional JSON body, extra headers,
    /// optional timeout.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        headers: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<ApiResponse, TransportError> {
        let mut req = GatewayRequest::new(method, path);
        if let Some(body) = body {
            req = req.json(body);
        }
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        self.send(req).await
    }

    /// Send a request.
    ///
    /// Non-2xx responses become [`TransportError::Http`] with a normalized
    /// message. The timeout covers the whole exchange including the body.
    pub async fn send(&self, req: GatewayRequest) -> Result<ApiResponse, TransportError> {
        if let Some(reason) = req.invalid {
            return Err(TransportError::InvalidRequest(reason));
        }

        let url = self.url_for(&req.path, req.versioned)?;
        let request_id = Uuid::new_v4().to_string();
        let headers = self.headers_for(&request_id, req.bearer, &req.headers)?;
        let timeout = req.timeout.unwrap_or(self.timeout);

        let mut builder = self
            .client
            .request(req.method.clone(), url.clone())
            .headers(headers);
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, async {
            let response = builder.send().await?;
            read_response(response).await
        })
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Err(_) => {
                warn!(
                    method = %req.method,
                    path = url.path(),
                    request_id = %request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(TransportError::Timeout)
            }
            Ok(Err(e)) => {
                debug!(
                    method = %req.method,
                    path = url.path(),
                    request_id = %request_id,
                    elapsed_ms,
                    error = %e,
                    "Request failed"
                );
                Err(e)
            }
            Ok(Ok(response)) => {
                debug!(
                    method = %req.method,
                    path = url.path(),
                    request_id = %request_id,
                    status = response.status,
                    elapsed_ms,
                    "Request completed"
                );
                Ok(response)
            }
        }
    }

    fn headers_for(
        &self,
        request_id: &str,
        bearer: Option<String>,
        extra: &[(String, String)],
    ) -> Result<HeaderMap, TransportError> {
        let mut headers = self.default_headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static(REQUEST_ID_HEADER),
            header_value(request_id)?,
        );
        if let Some(token) = bearer.or_else(|| self.bearer()) {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {token}"))?);
        }
        for (name, value) in extra {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header '{name}': {e}")))?;
            headers.insert(name, header_value(value)?);
        }
        Ok(headers)
    }
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .field("api_prefix", &self.api_prefix)
            .field("timeout", &self.timeout)
            .field("has_bearer", &self.bearer.read().is_some())
            .finish()
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::InvalidRequest(format!("invalid header value: {e}")))
}

async fn read_response(response: reqwest::Response) -> Result<ApiResponse, TransportError> {
    let status = response.status();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("json"));
    let text = response.text().await?;

    if !status.is_success() {
        return Err(TransportError::Http {
            status: status.as_u16(),
            message: envelope::error_message(status.as_u16(), is_json, &text),
        });
    }

    let body = if text.trim().is_empty() {
        ResponseBody::Empty
    } else if is_json {
        ResponseBody::Json(
            serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))?,
        )
    } else {
        ResponseBody::Text(text)
    };

    Ok(ApiResponse {
        status: status.as_u16(),
        body,
    })
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`HttpGateway`].
pub struct HttpGatewayBuilder {
    base_url: String,
    api_prefix: String,
    timeout: Duration,
    connect_timeout: Duration,
    user_agent: String,
    headers: Vec<(String, String)>,
}

impl HttpGatewayBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_prefix: API_PREFIX.to_string(),
            timeout: REQUEST_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            user_agent: USER_AGENT.to_string(),
            headers: Vec::new(),
        }
    }

    /// Set the versioned prefix. Empty disables it.
    pub fn api_prefix(mut self, prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        self.api_prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        };
        self
    }

    /// Set the default per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.user_agent = ua.to_string();
        self
    }

    /// Add a header sent with every request.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Build the gateway.
    pub fn build(self) -> Result<HttpGateway, TransportError> {
        let origin = Url::parse(&self.base_url)
            .map_err(|e| TransportError::InvalidRequest(format!("base url: {e}")))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(TransportError::InvalidRequest(format!(
                "base url must be http or https, got '{}'",
                origin.scheme()
            )));
        }

        let mut default_headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header '{name}': {e}")))?;
            default_headers.insert(name, header_value(value)?);
        }

        let client = Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(self.connect_timeout)
            .build()?;

        Ok(HttpGateway {
            client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_prefix: self.api_prefix,
            timeout: self.timeout,
            default_headers,
            bearer: RwLock::new(None),
        })
    }
}
