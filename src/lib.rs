//! Request/reply RPC over a shared queueing broker.
//!
//! A client publishes each call as a request envelope to one well-known queue
//! and waits, under a single deadline, for the reply on a private per-call
//! queue. A server consumes the shared queue one delivery at a time, runs the
//! handler selected by the envelope's operation tag, and publishes the result
//! back to the caller's reply queue.
//!
//! Operation sets are closed tagged unions, declared once with
//! [`tagged_union!`] and tied together by a [`Schema`]. Failures cross the
//! broker as an [`ErrorSlot`]: a success flag and a message.
//!
//! The in-memory broker ([`MemoryBroker`]) is always available. The
//! `transport_lapin` feature adds an AMQP 0-9-1 broker client.

// Import all sub modules once...
mod client;
mod domain;
mod macros;
mod protocol;
mod server;
mod transport;

mod rpc_config;

mod correlation;
mod error;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use client::{await_reply, RpcClient};
pub use server::{
    //
    ErrorHandler,
    HandlerError,
    HandlerRegistry,
    HandlerResult,
    OperationRegistry,
    RegistryPtr,
    RpcServer,
    ServerHandle,
};

pub use rpc_config::{RpcConfig, DEFAULT_REQUEST_QUEUE, DEFAULT_REQUEST_TIMEOUT};

pub use correlation::{CorrelationId, CORRELATION_ID_LEN};
pub use error::{BrokerError, DecodeError, EncodeError, Result, RpcError};

pub use protocol::{
    //
    decode_request,
    decode_response,
    encode_failure_response,
    encode_request,
    encode_response,
    parse_tag,
    peek_correlation_id,
    ErrorSlot,
    OperationTag,
    RemoteError,
    RequestEnvelope,
    ResponseEnvelope,
    Schema,
    Variant,
    CONTENT_TYPE,
    NOT_IMPLEMENTED_MESSAGE,
};

pub use transport::{publish, MemoryBroker, ReplyLeg};

#[cfg(feature = "transport_lapin")]
pub use transport::AmqpConnection;

// --- public re-exports
pub use domain::{
    //
    AckMode,
    Acknowledger,
    Address,
    BrokerResult,
    Channel,
    ChannelPtr,
    Connection,
    ConnectionPtr,
    Delivery,
    DeliveryStream,
    Message,
    QueueOptions,
};

#[doc(hidden)]
pub use serde_json;

/// Open a broker connection as configured.
///
/// With the `transport_lapin` feature and a `transport_uri`, dials the AMQP
/// broker. Otherwise connects to the process-global in-memory broker, so a
/// client and a server in one process meet on the same queues.
///
/// # Errors
///
/// Returns [`RpcError::ConnectFailed`] if the broker cannot be reached, or
/// [`RpcError::MissingConfig`] if a URI is given but no broker client is
/// compiled in.
pub async fn connect(config: &RpcConfig) -> Result<ConnectionPtr> {
    // ---
    match config.transport_uri.as_deref() {
        #[cfg(feature = "transport_lapin")]
        Some(uri) => AmqpConnection::connect(&config.connection_id, uri).await,

        #[cfg(not(feature = "transport_lapin"))]
        Some(uri) => Err(RpcError::MissingConfig(format!(
            "transport_uri {uri} given but no broker transport is enabled (feature transport_lapin)"
        ))),

        None => Ok(transport::global_broker().connect(config.connection_id.clone())),
    }
}
