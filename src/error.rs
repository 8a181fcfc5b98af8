//! Error types

use thiserror::Error;

/// Failures while loading the proxy list. These abort startup.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read proxy list {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no valid proxies found")]
    Empty,
}

/// Failure of a single identity probe. Recoverable; drives the retry loop.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to build client: {0}")]
    Client(String),

    #[error("request failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected status code {0}")]
    Status(u16),

    #[error("malformed response body: {0}")]
    Body(String),
}

impl ProbeError {
    /// A client that cannot be built will fail the same way on every attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProbeError::Client(_))
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProbeError::Timeout
        } else if e.is_builder() {
            ProbeError::Client(e.to_string())
        } else {
            ProbeError::Connect(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(e: serde_json::Error) -> Self {
        ProbeError::Body(e.to_string())
    }
}
