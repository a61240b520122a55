use std::time::Duration;

/// Outcome of a token request to a cluster token server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenResultStatus {
    /// The server granted the tokens.
    Ok,
    /// The cluster wide threshold is exhausted.
    Blocked,
    /// The tokens are granted after waiting `wait`. Flow checks admit it
    /// only when `wait` is zero and block otherwise.
    ShouldWait,
    /// The request was malformed.
    BadRequest,
    /// No rule is known for the flow id.
    NoRuleExists,
    /// The server refused to serve the request.
    TooManyRequest,
    /// The client could not reach a server.
    Fail,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenResult {
    pub status: TokenResultStatus,
    pub remaining: u32,
    pub wait: Duration,
}

impl TokenResult {
    pub fn new(status: TokenResultStatus) -> Self {
        Self {
            status,
            remaining: 0,
            wait: Duration::ZERO,
        }
    }

    pub fn with_remaining(mut self, remaining: u32) -> Self {
        self.remaining = remaining;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }
}

/// Client side of cluster flow control.
///
/// Implementations are called on the hot path of every cluster mode rule
/// check and must bound their own latency.
pub trait ClusterTokenClient: Send + Sync {
    fn request_token(&self, flow_id: u64, acquire_count: u32) -> TokenResult;

    /// Address of the token server in use, if connected.
    fn current_server(&self) -> Option<String>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterClientConfig {
    pub request_timeout: Duration,
}

impl Default for ClusterClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(20),
        }
    }
}

impl ClusterClientConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// A token client with no transport.
///
/// Every request fails, which makes cluster mode rules fall back to their
/// local controller when they allow it.
#[derive(Clone, Debug, Default)]
pub struct DefaultClusterTokenClient {
    config: ClusterClientConfig,
}

impl DefaultClusterTokenClient {
    pub fn new(config: ClusterClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusterClientConfig {
        &self.config
    }
}

impl ClusterTokenClient for DefaultClusterTokenClient {
    fn request_token(&self, flow_id: u64, acquire_count: u32) -> TokenResult {
        tracing::trace!(
            flow_id,
            acquire_count,
            timeout_ms = self.config.request_timeout.as_millis() as u64,
            "no cluster transport, token request failed"
        );
        TokenResult::new(TokenResultStatus::Fail)
    }

    fn current_server(&self) -> Option<String> {
        None
    }
}
