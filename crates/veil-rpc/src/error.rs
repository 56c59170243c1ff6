//! RPC error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP error calling {method} at {url}: {source}")]
    Http {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} at {url} returned HTTP {status}: {body}")]
    HttpStatus {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error {code} from {method}: {message}")]
    Rpc {
        code: i64,
        message: String,
        method: String,
    },

    #[error("no result in response to {context}")]
    NoResult { context: String },

    #[error("authentication failed at {url}")]
    AuthFailed { url: String },

    #[error("daemon busy during {context}")]
    Busy { context: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("malformed daemon response: {0}")]
    InvalidResponse(String),

    #[error("transaction rejected: {reason}")]
    Rejected { reason: String },
}

impl RpcError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Http { source, .. } => source.is_timeout() || source.is_connect(),
            RpcError::HttpStatus { status, .. } => *status >= 500,
            RpcError::Busy { .. } | RpcError::Connection(_) => true,
            _ => false,
        }
    }
}
