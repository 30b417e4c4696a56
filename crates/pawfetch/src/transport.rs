//! Transport seam between the optimizer and the network

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::OptimizerConfig;
use crate::error::RequestError;

/// Per-request options
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// HTTP method
    pub method: Method,
    /// Extra headers, applied after the transport defaults
    pub headers: Vec<(String, String)>,
    /// Raw request body
    pub body: Option<String>,
    /// Overrides the transport's default timeout
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }
}

impl RequestOptions {
    /// Plain GET
    pub fn get() -> Self {
        Self::default()
    }

    /// POST with a JSON body
    pub fn post_json(body: &Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body.to_string()),
            ..Self::default()
        }
        .with_header(CONTENT_TYPE.as_str(), "application/json")
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Set a timeout for this request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Status and decoded JSON body of a response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status
    pub status: u16,
    /// JSON body; `Null` when empty
    pub body: Value,
}

impl ApiResponse {
    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can execute a request
///
/// Non-2xx responses are returned as `Ok`; the optimizer decides what they
/// mean. `Err` is reserved for failures with no response at all.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one request
    async fn send(&self, url: &str, options: &RequestOptions) -> Result<ApiResponse, RequestError>;
}

/// reqwest-backed transport
///
/// Responses are decompressed transparently (gzip, brotli); JSON is
/// requested by default.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    default_timeout: Duration,
}

impl HttpTransport {
    /// Build a transport resolving relative URLs against `base_url`
    pub fn new(base_url: &str, default_timeout: Duration) -> Result<Self, RequestError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RequestError::Network(format!("invalid base URL '{}': {}", base_url, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            base_url,
            default_timeout,
        })
    }

    /// Build a transport from optimizer settings
    pub fn from_config(config: &OptimizerConfig) -> Result<Self, RequestError> {
        Self::new(&config.base_url, config.request_timeout())
    }

    fn resolve(&self, url: &str) -> Result<Url, RequestError> {
        self.base_url
            .join(url)
            .map_err(|e| RequestError::Network(format!("invalid URL '{}': {}", url, e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, url: &str, options: &RequestOptions) -> Result<ApiResponse, RequestError> {
        let target = self.resolve(url)?;
        debug!("{} {}", options.method, target);

        let mut request = self
            .client
            .request(options.method.clone(), target)
            .timeout(options.timeout.unwrap_or(self.default_timeout));

        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RequestError::Network(format!("invalid header '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RequestError::Network(format!("invalid header value: {}", e)))?;
            request = request.header(name, value);
        }

        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| RequestError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| RequestError::Network(e.to_string()))?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(body) => body,
                Err(e) if (200..300).contains(&status) => {
                    return Err(RequestError::Decode(e.to_string()));
                }
                // Error pages are often HTML; keep the text for the message
                Err(_) => Value::String(text),
            }
        };

        Ok(ApiResponse { status, body })
    }
}
