//! Public, broker-agnostic RPC configuration.
//!
//! This type names no broker client. [`crate::connect`] interprets
//! `transport_uri`; client and server read the rest.

use std::time::Duration;

/// Request queue shared by clients and servers unless configured otherwise.
pub const DEFAULT_REQUEST_QUEUE: &str = "rpc.requests";

/// Per-call deadline unless configured otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Connection parameters and protocol settings.
///
/// # Example
///
/// ```
/// use broker_rpc::RpcConfig;
/// use std::time::Duration;
///
/// let config = RpcConfig::with_broker("amqp://localhost:5672/%2f", "billing-client")
///     .with_request_queue("billing.requests")
///     .with_request_timeout(Duration::from_secs(5));
/// assert_eq!(config.prefetch_count, 1);
/// ```
#[derive(Debug, Clone)]
pub struct RpcConfig {
    // ---
    /// Broker connection URI, e.g. `"amqp://localhost:5672/%2f"`.
    ///
    /// `None` selects the process-global in-memory broker.
    pub transport_uri: Option<String>,

    /// Label for this connection, used in logs.
    pub connection_id: String,

    /// Well-known queue requests are published to and served from.
    pub request_queue: String,

    /// Deadline for one call, covering publish and reply wait together.
    ///
    /// Default: 15 seconds
    pub request_timeout: Duration,

    /// Unacknowledged requests a server holds at once.
    ///
    /// Default: 1 (strictly one request at a time)
    pub prefetch_count: u16,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self::memory("rpc")
    }
}

impl RpcConfig {
    /// Create a config for the broker at `transport_uri`.
    pub fn with_broker(transport_uri: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            transport_uri: Some(transport_uri.into()),
            ..Self::memory(connection_id)
        }
    }

    /// Create an in-memory config (no broker).
    pub fn memory(connection_id: impl Into<String>) -> Self {
        Self {
            transport_uri: None,
            connection_id: connection_id.into(),
            request_queue: DEFAULT_REQUEST_QUEUE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            prefetch_count: 1,
        }
    }

    /// Set the shared request queue name.
    pub fn with_request_queue(mut self, name: impl Into<String>) -> Self {
        self.request_queue = name.into();
        self
    }

    /// Set the per-call deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the server prefetch window (0 = unlimited).
    pub fn with_prefetch_count(mut self, count: u16) -> Self {
        self.prefetch_count = count;
        self
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_defaults() {
        // ---
        let config = RpcConfig::default();
        assert!(config.transport_uri.is_none());
        assert_eq!(config.request_queue, DEFAULT_REQUEST_QUEUE);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.prefetch_count, 1);
    }

    #[test]
    fn test_with_broker_keeps_defaults() {
        // ---
        let config = RpcConfig::with_broker("amqp://localhost", "svc").with_prefetch_count(4);
        assert_eq!(config.transport_uri.as_deref(), Some("amqp://localhost"));
        assert_eq!(config.connection_id, "svc");
        assert_eq!(config.prefetch_count, 4);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }
}
