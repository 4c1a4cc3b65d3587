// src/client/mod.rs
//! RPC client implementation.
//!
//! This module contains the core [`RpcClient`] type which sends requests to
//! the shared request queue and waits for the matching reply.
//!
//! # Architecture
//!
//! Every call runs through the same steps:
//!
//! 1. The request envelope is encoded under a fresh correlation id.
//! 2. A [`ReplyLeg`] is opened: its own channel, and a private reply queue
//!    whose address travels as the request's reply-to.
//! 3. The publish runs as its own task while the call waits on it.
//! 4. The reply stream is scanned for a delivery carrying the call's
//!    correlation id; everything else is discarded.
//! 5. The leg is released, deleting the reply queue.
//!
//! One deadline covers steps 2 to 4. Time spent opening the leg or publishing
//! is time not available for the reply. When the deadline elapses, whichever
//! step is pending is cancelled and the call fails with [`RpcError::Timeout`].
//! Step 5 runs as its own task. The caller waits for it for a short grace
//! period at most; a slow close finishes in the background.
//!
//! # Concurrency
//!
//! Calls share nothing but the connection. Any number may be in flight at
//! once, each on its own reply queue.
//!
//! There is no retry. A failed or timed-out call can be repeated by the caller;
//! the repeat gets a new correlation id.

mod reply;

pub use reply::await_reply;

use std::marker::PhantomData;
use std::time::Duration;

use tokio::time::{self, Instant};

use crate::{
    // ---
    log_debug,
    log_warn,
    protocol::{encode_request, RequestEnvelope, Schema, Variant},
    transport::{publish, ReplyLeg},
    Address,
    ConnectionPtr,
    Result,
    RpcConfig,
    RpcError,
};

/// How long teardown may hold the caller once the outcome is known.
const RELEASE_GRACE: Duration = Duration::from_millis(20);

/// Stand-in for an unbounded wait; about 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    // ---
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Client side of the request/reply protocol for the operation set `S`.
///
/// Cheap to clone; clones share the connection.
pub struct RpcClient<S: Schema> {
    connection: ConnectionPtr,
    request_queue: Address,
    request_timeout: Duration,
    _schema: PhantomData<fn() -> S>,
}

impl<S: Schema> Clone for RpcClient<S> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            request_queue: self.request_queue.clone(),
            request_timeout: self.request_timeout,
            _schema: PhantomData,
        }
    }
}

impl<S: Schema> RpcClient<S> {
    // ---
    /// Create a client publishing to `config.request_queue` with
    /// `config.request_timeout` as the default deadline.
    pub fn new(connection: ConnectionPtr, config: &RpcConfig) -> Self {
        // ---
        Self {
            connection,
            request_queue: Address::from(config.request_queue.as_str()),
            request_timeout: config.request_timeout,
            _schema: PhantomData,
        }
    }

    /// Call the remote operation selected by `payload`'s tag.
    ///
    /// # Errors
    ///
    /// - Setup failures of the reply leg ([`RpcError::ChannelOpenFailed`],
    ///   [`RpcError::DestinationDeclareFailed`], [`RpcError::ConsumeBindFailed`]).
    /// - [`RpcError::EncodeFailed`] for a payload that cannot be sent.
    /// - [`RpcError::PublishFailed`] if the broker refuses the request.
    /// - [`RpcError::Timeout`] if no reply arrives within the configured timeout.
    /// - [`RpcError::NotImplemented`] if the server has no handler.
    /// - [`RpcError::RemoteOperationFailed`] if the handler failed.
    pub async fn call(&self, payload: S::Payload) -> Result<S::Output> {
        self.call_with_timeout(payload, self.request_timeout).await
    }

    /// Like [`call`](Self::call) with an explicit deadline.
    ///
    /// `Duration::MAX` waits as long as the runtime's timer allows.
    pub async fn call_with_timeout(
        &self,
        payload: S::Payload,
        timeout: Duration,
    ) -> Result<S::Output> {
        // ---
        let deadline = deadline_after(timeout);

        let envelope = RequestEnvelope::new(payload);
        let operation = envelope.operation;
        let correlation_id = envelope.correlation_id.clone();
        let bytes = encode_request(&envelope)?;

        let mut leg = match time::timeout_at(deadline, ReplyLeg::open(self.connection.as_ref())).await
        {
            Ok(leg) => leg?,
            Err(_) => {
                log_warn!("[{correlation_id}] {operation} timed out opening the reply queue");
                return Err(RpcError::Timeout);
            }
        };

        let channel = leg.channel().clone();
        let destination = self.request_queue.clone();
        let reply_to = leg.address().clone();
        let id = correlation_id.clone();

        let mut publishing = tokio::spawn(async move {
            publish(&channel, &destination, Some(&reply_to), &id, bytes).await
        });

        let published = match time::timeout_at(deadline, &mut publishing).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(RpcError::PublishFailed(crate::BrokerError::new(format!(
                "publish task failed: {join}"
            )))),
            Err(_) => {
                publishing.abort();
                Err(RpcError::Timeout)
            }
        };

        let outcome = match published {
            Ok(()) => {
                log_debug!("[{correlation_id}] {operation} published to {}", self.request_queue);
                match time::timeout_at(
                    deadline,
                    await_reply::<S::Output>(leg.inbound(), &correlation_id, operation),
                )
                .await
                {
                    Ok(reply) => reply.and_then(|envelope| envelope.into_result()),
                    Err(_) => Err(RpcError::Timeout),
                }
            }
            Err(e) => Err(e),
        };

        if matches!(outcome, Err(RpcError::Timeout)) {
            log_warn!(
                "[{correlation_id}] {operation} timed out after {timeout:?}; a late reply will be dropped"
            );
        }

        // A slow broker close must not hold the caller past the deadline.
        let release = tokio::spawn(leg.release());
        if time::timeout(RELEASE_GRACE, release).await.is_err() {
            log_debug!("[{correlation_id}] reply queue release continues in the background");
        }

        outcome
    }

    /// Call and degrade any failure to `None`.
    ///
    /// The failure is logged and otherwise lost. Use [`call`](Self::call)
    /// unless the caller genuinely cannot act on the reason.
    pub async fn call_lossy(&self, payload: S::Payload) -> Option<S::Output> {
        // ---
        let operation = payload.tag();
        match self.call(payload).await {
            Ok(output) => Some(output),
            Err(e) => {
                log_warn!("{operation} failed: {e}");
                None
            }
        }
    }

    /// Close the underlying connection. Other clones become unusable.
    pub async fn close(&self) -> Result<()> {
        // ---
        self.connection
            .close()
            .await
            .map_err(RpcError::CloseFailed)
    }

    pub fn connection(&self) -> &ConnectionPtr {
        &self.connection
    }
}
