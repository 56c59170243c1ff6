//! Base JSON-RPC 2.0 HTTP client.
//!
//! Provides `call()` for JSON-RPC methods (POST to `/json_rpc`) and `post()`
//! for the daemon's plain JSON endpoints. Supports Basic auth, configurable
//! timeout, and retry with exponential backoff on transient failures.

use crate::error::RpcError;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Configuration for an RPC client.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Base URL (e.g., `http://localhost:18081`).
    pub url: String,
    /// Optional username for Basic auth.
    pub username: Option<String>,
    /// Optional password for Basic auth.
    pub password: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
    /// Number of retry attempts on transient failure.
    pub retries: u32,
    /// Initial delay between retries (doubles each attempt).
    pub retry_delay: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:18081".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
            retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Async HTTP client for a daemon's JSON-RPC and JSON endpoints.
pub struct RpcClient {
    client: reqwest::Client,
    config: RpcConfig,
    request_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Self::with_config(RpcConfig { url: url.to_string(), ..Default::default() })
    }

    pub fn with_config(mut config: RpcConfig) -> Result<Self, RpcError> {
        config.url = config.url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| RpcError::Connection(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config, request_id: AtomicU64::new(0) })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn auth_header(&self) -> Option<HeaderValue> {
        match (&self.config.username, &self.config.password) {
            (Some(user), Some(pass)) => {
                let creds = format!("{}:{}", user, pass);
                let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
                HeaderValue::from_str(&format!("Basic {}", encoded)).ok()
            }
            _ => None,
        }
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(auth) = self.auth_header() {
            headers.insert(AUTHORIZATION, auth);
        }
        headers
    }

    /// Run `op` up to `retries + 1` times, backing off between transient failures.
    async fn with_retry<F, Fut>(&self, context: &str, mut op: F) -> Result<Value, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, RpcError>>,
    {
        let attempts = self.config.retries + 1;
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = self.config.retry_delay * 2u32.saturating_pow(attempt - 1);
                log::debug!("retrying {} in {:?} (attempt {})", context, delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }
            match op().await {
                Ok(val) => return Ok(val),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    log::warn!("{} failed: {}", context, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Call a JSON-RPC 2.0 method (POST to `/json_rpc`).
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let url = format!("{}/json_rpc", self.config.url);
        self.with_retry(method, || {
            let req = JsonRpcRequest { jsonrpc: "2.0", id: self.next_id(), method, params: params.clone() };
            let url = url.as_str();
            async move {
                let body = self.send(url, method, &serde_json::to_value(&req)?).await?;
                let body: JsonRpcResponse = serde_json::from_value(body)?;
                if let Some(err) = body.error {
                    if err.message == "BUSY" {
                        return Err(RpcError::Busy { context: method.to_string() });
                    }
                    return Err(RpcError::Rpc {
                        code: err.code,
                        message: err.message,
                        method: method.to_string(),
                    });
                }
                body.result.ok_or(RpcError::NoResult { context: method.to_string() })
            }
        })
        .await
    }

    /// POST JSON to a plain endpoint such as `/get_height`.
    pub async fn post(&self, endpoint: &str, body: &Value) -> Result<Value, RpcError> {
        let url = format!("{}{}", self.config.url, endpoint);
        self.with_retry(endpoint, || self.send(&url, endpoint, body)).await
    }

    async fn send(&self, url: &str, method: &str, body: &Value) -> Result<Value, RpcError> {
        let http_err = |source| RpcError::Http {
            method: method.to_string(),
            url: url.to_string(),
            source,
        };

        let resp = self
            .client
            .post(url)
            .headers(self.build_headers())
            .json(body)
            .send()
            .await
            .map_err(http_err)?;

        let status = resp.status().as_u16();
        if status == 401 {
            return Err(RpcError::AuthFailed { url: url.to_string() });
        }
        if status >= 400 {
            let text = resp.text().await.unwrap_or_default();
            return Err(RpcError::HttpStatus {
                method: method.to_string(),
                url: url.to_string(),
                status,
                body: text.chars().take(500).collect(),
            });
        }

        resp.json().await.map_err(http_err)
    }
}
