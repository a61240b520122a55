use shot_guard::BlockError;

/// Errors produced by the Tower Guard middleware stack.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// The request was rejected by a rule before reaching the inner service.
    ///
    /// When the `axum` feature is enabled, flow, system and custom blocks
    /// convert to `429 Too Many Requests` and degrade blocks to
    /// `503 Service Unavailable`.
    #[error("Request blocked: {0}")]
    Blocked(BlockError),

    /// The request exceeded the maximum allowed service time.
    ///
    /// When the `axum` feature is enabled, this converts to `408 Request Timeout`.
    #[error("Request timed out")]
    Timeout,

    /// The guard itself failed, for example a stage error.
    ///
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Guard failure: {0}")]
    Guard(String),

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl ServiceError {
    pub fn as_block(&self) -> Option<&BlockError> {
        match self {
            Self::Blocked(block) => Some(block),
            _ => None,
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            Self::Blocked(BlockError::Degrade { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Blocked(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::Guard(_) | Self::Inner(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}
