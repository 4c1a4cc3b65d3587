// src/server/mod.rs
//! RPC server implementation.
//!
//! [`RpcServer`] consumes the shared request queue and answers each request on
//! the reply address the request carries.
//!
//! # Processing model
//!
//! One consumer, one delivery at a time. The request queue is consumed with
//! manual acknowledgment and a prefetch window (1 by default), so the broker
//! hands out the next request only after the current one is settled. Several
//! server processes can share the queue to scale out.
//!
//! For each delivery:
//!
//! 1. Decode the request envelope.
//! 2. Hand the payload to the [`OperationRegistry`].
//! 3. Encode the response under the request's tag and correlation id.
//! 4. Publish it to the delivery's reply address.
//! 5. Acknowledge the delivery.
//!
//! A request whose tag this server does not know, or has no handler for, is
//! answered with a "not implemented" outcome. A request that cannot be decoded
//! at all, or has no reply address, is reported to the error handler and
//! rejected without requeue. Failures never stop the loop.
//!
//! # Shutdown
//!
//! [`ServerHandle::shutdown`] stops the loop and closes the channel. A request
//! in flight at that moment is not acknowledged; the broker redelivers it.

mod registry;

pub use registry::{HandlerError, HandlerRegistry, HandlerResult, OperationRegistry, RegistryPtr};

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    protocol::{
        decode_request,
        encode_failure_response,
        encode_response,
        ErrorSlot,
        ResponseEnvelope,
        Schema,
    },
    transport::publish,
    AckMode,
    ChannelPtr,
    ConnectionPtr,
    CorrelationId,
    DecodeError,
    Delivery,
    DeliveryStream,
    QueueOptions,
    Result,
    RpcConfig,
    RpcError,
};

/// Callback receiving failures the loop cannot report to a caller.
pub type ErrorHandler = Arc<dyn Fn(&RpcError) + Send + Sync>;

fn default_error_handler() -> ErrorHandler {
    Arc::new(|err: &RpcError| {
        log_error!("rpc server: {err}");
    })
}

/// Server side of the request/reply protocol for the operation set `S`.
pub struct RpcServer<S: Schema> {
    connection: ConnectionPtr,
    registry: RegistryPtr<S>,
    request_queue: String,
    prefetch_count: u16,
    on_error: ErrorHandler,
}

impl<S: Schema> RpcServer<S> {
    // ---
    pub fn new(connection: ConnectionPtr, registry: RegistryPtr<S>, config: &RpcConfig) -> Self {
        // ---
        Self {
            connection,
            registry,
            request_queue: config.request_queue.clone(),
            prefetch_count: config.prefetch_count,
            on_error: default_error_handler(),
        }
    }

    /// Replace the default error handler, which logs at error level.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RpcError) + Send + Sync + 'static,
    {
        self.on_error = Arc::new(handler);
        self
    }

    /// Set up the consumer and start the loop in the background.
    ///
    /// # Errors
    ///
    /// Setup failures are returned here, before any request is read:
    /// [`RpcError::ChannelOpenFailed`], [`RpcError::DestinationDeclareFailed`],
    /// [`RpcError::QosFailed`] or [`RpcError::ConsumeBindFailed`].
    pub async fn spawn(self) -> Result<ServerHandle> {
        // ---
        let channel = self
            .connection
            .open_channel()
            .await
            .map_err(RpcError::ChannelOpenFailed)?;

        let stream = match self.consume(&channel).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = channel.close().await;
                return Err(e);
            }
        };

        log_info!(
            "[{}] serving {} (prefetch {})",
            self.connection.connection_id(),
            self.request_queue,
            self.prefetch_count
        );

        let dispatcher = Dispatcher {
            channel: channel.clone(),
            registry: self.registry,
            on_error: self.on_error,
            connection_id: self.connection.connection_id().to_string(),
        };
        let join = tokio::spawn(dispatcher.run(stream));

        Ok(ServerHandle {
            join,
            channel,
            request_queue: self.request_queue,
        })
    }

    /// Serve until the consumer stream ends.
    pub async fn run(self) -> Result<()> {
        // ---
        let handle = self.spawn().await?;
        handle.finished().await;
        Ok(())
    }

    async fn consume(&self, channel: &ChannelPtr) -> Result<DeliveryStream> {
        // ---
        channel
            .declare_queue(&self.request_queue, QueueOptions::shared_requests())
            .await
            .map_err(RpcError::DestinationDeclareFailed)?;

        channel
            .set_prefetch(self.prefetch_count)
            .await
            .map_err(RpcError::QosFailed)?;

        channel
            .consume(&self.request_queue, AckMode::Manual)
            .await
            .map_err(RpcError::ConsumeBindFailed)
    }
}

/// Handle to a running server loop.
pub struct ServerHandle {
    join: JoinHandle<()>,
    channel: ChannelPtr,
    request_queue: String,
}

impl ServerHandle {
    pub fn request_queue(&self) -> &str {
        &self.request_queue
    }

    /// Stop the loop and close its channel. Unacknowledged deliveries go back
    /// to the broker.
    pub async fn shutdown(self) -> Result<()> {
        // ---
        self.join.abort();
        let _ = self.join.await;
        self.channel.close().await.map_err(RpcError::CloseFailed)?;
        log_info!("server on {} stopped", self.request_queue);
        Ok(())
    }

    /// Wait for the loop to end on its own (consumer cancelled or channel
    /// closed).
    pub async fn finished(self) {
        // ---
        if let Err(e) = self.join.await {
            log_error!("server loop on {} ended abnormally: {e}", self.request_queue);
        }
    }
}

struct Dispatcher<S: Schema> {
    channel: ChannelPtr,
    registry: RegistryPtr<S>,
    on_error: ErrorHandler,
    connection_id: String,
}

impl<S: Schema> Dispatcher<S> {
    async fn run(self, mut stream: DeliveryStream) {
        // ---
        while let Some(delivery) = stream.next().await {
            self.dispatch(delivery).await;
        }
        log_debug!("[{}] request stream ended", self.connection_id);
    }

    async fn dispatch(&self, delivery: Delivery) {
        // ---
        let Some(reply_to) = delivery.reply_to.clone() else {
            let id = delivery.correlation_id.as_deref().unwrap_or("-").to_string();
            self.report(RpcError::MissingReplyAddress(id));
            self.reject(&delivery).await;
            return;
        };

        let Some((body_id, bytes)) = self.respond(&delivery).await else {
            self.reject(&delivery).await;
            return;
        };

        // Answer under the id the caller put in metadata, falling back to the
        // body's.
        let correlation_id = match delivery.correlation_id.as_deref() {
            Some(id) => CorrelationId::from(id),
            None => body_id,
        };

        if let Err(e) = publish(&self.channel, &reply_to, None, &correlation_id, bytes).await {
            self.report(e);
        }

        if let Err(e) = delivery.ack().await {
            self.report(RpcError::AcknowledgeFailed(e));
        }
    }

    /// Build the encoded response for a delivery, or `None` if it cannot be
    /// answered at all.
    async fn respond(&self, delivery: &Delivery) -> Option<(CorrelationId, bytes::Bytes)> {
        // ---
        let request = match decode_request::<S::Payload>(&delivery.payload) {
            Ok(request) => request,
            Err(DecodeError::UnknownOperation {
                operation,
                correlation_id,
            }) => {
                log_warn!("[{correlation_id}] unknown operation {operation}");
                return self.failure(&operation, correlation_id, ErrorSlot::not_implemented());
            }
            Err(e) => {
                self.report(RpcError::DecodeFailed(e));
                return None;
            }
        };

        let operation = request.operation;
        let correlation_id = request.correlation_id;
        log_debug!("[{correlation_id}] handling {operation}");

        let response = match self.registry.invoke(request.payload).await {
            Some(outcome) => ResponseEnvelope::<S::Output>::from_outcome(
                operation,
                correlation_id.clone(),
                outcome,
            ),
            None => {
                log_warn!("[{correlation_id}] no handler for {operation}");
                ResponseEnvelope {
                    operation,
                    correlation_id: correlation_id.clone(),
                    result: None,
                    outcome: ErrorSlot::not_implemented(),
                }
            }
        };

        match encode_response::<S::Output>(&response) {
            Ok(bytes) => Some((correlation_id, bytes)),
            Err(e) => {
                // The caller still gets an answer, carrying the reason.
                let slot = ErrorSlot::to_wire(Some(&e));
                self.report(RpcError::EncodeFailed(e));
                self.failure(&operation.to_string(), correlation_id, slot)
            }
        }
    }

    fn failure(
        &self,
        operation: &str,
        correlation_id: CorrelationId,
        slot: ErrorSlot,
    ) -> Option<(CorrelationId, bytes::Bytes)> {
        // ---
        match encode_failure_response(operation, &correlation_id, slot) {
            Ok(bytes) => Some((correlation_id, bytes)),
            Err(e) => {
                self.report(RpcError::EncodeFailed(e));
                None
            }
        }
    }

    async fn reject(&self, delivery: &Delivery) {
        // ---
        if let Err(e) = delivery.reject().await {
            self.report(RpcError::AcknowledgeFailed(e));
        }
    }

    fn report(&self, err: RpcError) {
        (self.on_error)(&err);
    }
}
