use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Errors that can occur while serving requests.
///
/// Client mistakes (bad credentials, oversized bodies, unknown routes) are
/// not errors at this level; sessions turn those into 4xx responses. These
/// variants cover the plumbing underneath.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize response document: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The request body stream failed mid-flight (connection reset, h2
    /// stream error). No response is attempted on this path.
    #[error("request body stream failed: {0}")]
    Transport(String),
}
