use reqwest::StatusCode;
use thiserror::Error;

/// Unified error type for the proxy pool and the request retrier
#[derive(Error, Debug)]
pub enum PoolError {
    // Control plane errors
    #[error("Control plane configuration error: {0}")]
    Configuration(String),

    #[error("Control plane unavailable: {0}")]
    ControlPlaneUnavailable(String),

    #[error("Control plane rejected node switch ({status}): {body}")]
    ControlPlane { status: StatusCode, body: String },

    // Pool errors
    #[error("No healthy proxy nodes available")]
    NoHealthyNode,

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    // Request errors
    #[error("Transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: StatusCode },

    #[error("Request to {url} failed: {source}")]
    NonRetryable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP client error: {0}")]
    Client(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Classify a failed `send()` from the HTTP client.
    ///
    /// Builder and redirect-policy failures will not improve on retry; everything
    /// else the client reports while sending is a transport failure.
    pub fn from_send(url: &str, err: reqwest::Error) -> Self {
        if err.is_builder() || err.is_redirect() {
            PoolError::NonRetryable {
                url: url.to_string(),
                source: err,
            }
        } else {
            PoolError::Transport {
                url: url.to_string(),
                source: err,
            }
        }
    }

    /// Whether the retry loop absorbs this error and tries again
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Transport { .. } | PoolError::HttpStatus { .. })
    }

    /// Whether this is a connection-level failure
    pub fn is_transport(&self) -> bool {
        matches!(self, PoolError::Transport { .. })
    }

    /// The HTTP status carried by a status failure
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            PoolError::HttpStatus { status, .. } => Some(*status),
            PoolError::ControlPlane { status, .. } => Some(*status),
            _ => None,
        }
    }
}
