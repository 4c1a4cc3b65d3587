//! Error taxonomy for broker setup, the RPC exchange, and the wire codec.

use thiserror::Error;

use crate::protocol::RemoteError;

/// Failure reported by a broker implementation.
///
/// Broker clients expose very different error types; at this boundary only the
/// message survives. The component that called the broker wraps it in the
/// [`RpcError`] variant naming the step that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BrokerError {
    message: String,
}

impl BrokerError {
    pub fn new(message: impl Into<String>) -> Self {
        // ---
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure to turn a payload or result into wire form.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// The variant exists locally but cannot be carried across the broker.
    #[error("variant {0} cannot be encoded for transport")]
    UnsupportedVariant(String),

    /// A result whose variant answers a different operation than the request.
    #[error("result variant {found} does not answer operation {expected}")]
    OperationMismatch { expected: String, found: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure to recover an envelope from wire bytes.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The bytes are not an envelope at all.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The envelope is well formed but names an operation this side does not
    /// know. The correlation id is kept so a reply can still be addressed.
    #[error("unknown operation tag: {operation}")]
    UnknownOperation {
        operation: String,
        correlation_id: crate::CorrelationId,
    },

    /// The content does not match the shape the tag selects.
    #[error("invalid content for {operation}: {source}")]
    InvalidContent {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    /// A successful response arrived without a result.
    #[error("successful response for {0} carries no result")]
    MissingResult(String),

    /// A response names a different operation than the request it answers.
    #[error("response operation {found} does not match request operation {expected}")]
    OperationMismatch { expected: String, found: String },
}

/// Errors that can occur during RPC operations.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Dialing the broker failed.
    #[error("failed to connect to broker: {0}")]
    ConnectFailed(#[source] BrokerError),

    /// Opening a channel on an established connection failed.
    #[error("failed to open a channel: {0}")]
    ChannelOpenFailed(#[source] BrokerError),

    /// Declaring a queue failed.
    #[error("failed to declare a queue: {0}")]
    DestinationDeclareFailed(#[source] BrokerError),

    /// Setting the consumer prefetch failed.
    #[error("failed to set QoS: {0}")]
    QosFailed(#[source] BrokerError),

    /// Attaching a consumer to a queue failed.
    #[error("failed to register a consumer: {0}")]
    ConsumeBindFailed(#[source] BrokerError),

    /// Handing a message to the broker failed.
    #[error("failed to publish a message: {0}")]
    PublishFailed(#[source] BrokerError),

    /// Acknowledging or rejecting a delivery failed.
    #[error("failed to acknowledge a delivery: {0}")]
    AcknowledgeFailed(#[source] BrokerError),

    /// Closing a connection or channel failed.
    #[error("failed to close: {0}")]
    CloseFailed(#[source] BrokerError),

    #[error("failed to encode envelope: {0}")]
    EncodeFailed(#[from] EncodeError),

    #[error("failed to decode envelope: {0}")]
    DecodeFailed(#[from] DecodeError),

    /// The call deadline elapsed before a matching reply arrived.
    #[error("request timed out")]
    Timeout,

    /// The receiving side has no handler for the operation.
    #[error("operation not implemented: {0}")]
    NotImplemented(String),

    /// The remote handler ran and reported a failure. Only its message
    /// crosses the wire.
    #[error("{0}")]
    RemoteOperationFailed(#[from] RemoteError),

    /// The reply stream ended before a matching reply arrived.
    #[error("reply stream closed before a response arrived")]
    ConnectionLost,

    /// A request arrived without a reply address, so it cannot be answered.
    #[error("request {0} carries no reply address")]
    MissingReplyAddress(String),

    /// Required configuration is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
