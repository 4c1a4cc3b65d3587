//! Per-call reply leg and the publish helper shared by client and server.
//!
//! A [`ReplyLeg`] owns one channel and one private, server-named reply queue
//! with an auto-acknowledged consumer on it. It exists for exactly one call:
//! the request carries its address as the reply-to, and the leg is released
//! once the call ends, whatever the outcome. Releasing closes the channel,
//! which deletes the queue, so replies that arrive later are dropped by the
//! broker.

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    // ---
    log_debug,
    log_warn,
    protocol::CONTENT_TYPE,
    AckMode,
    Address,
    ChannelPtr,
    Connection,
    CorrelationId,
    DeliveryStream,
    Message,
    QueueOptions,
    Result,
    RpcError,
};

/// Private reply queue for a single call.
pub struct ReplyLeg {
    channel: ChannelPtr,
    address: Address,
    inbound: DeliveryStream,
    released: bool,
}

impl ReplyLeg {
    /// Open a channel, declare a private reply queue and consume from it.
    ///
    /// # Errors
    ///
    /// Each setup step fails with its own kind:
    /// [`RpcError::ChannelOpenFailed`], [`RpcError::DestinationDeclareFailed`]
    /// or [`RpcError::ConsumeBindFailed`]. The channel is closed on the later
    /// two.
    pub async fn open(connection: &dyn Connection) -> Result<Self> {
        // ---
        let channel = connection
            .open_channel()
            .await
            .map_err(RpcError::ChannelOpenFailed)?;

        let queue = match channel.declare_queue("", QueueOptions::private_reply()).await {
            Ok(queue) => queue,
            Err(e) => {
                let _ = channel.close().await;
                return Err(RpcError::DestinationDeclareFailed(e));
            }
        };

        let inbound = match channel.consume(&queue, AckMode::Auto).await {
            Ok(inbound) => inbound,
            Err(e) => {
                let _ = channel.close().await;
                return Err(RpcError::ConsumeBindFailed(e));
            }
        };

        log_debug!(
            "[{}] reply leg open on {queue}",
            connection.connection_id()
        );

        Ok(Self {
            channel,
            address: Address::from(queue),
            inbound,
            released: false,
        })
    }

    /// Address to put in the request's reply-to.
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn channel(&self) -> &ChannelPtr {
        &self.channel
    }

    /// Deliveries arriving on the reply queue.
    pub fn inbound(&mut self) -> &mut DeliveryStream {
        &mut self.inbound
    }

    /// Close the channel, deleting the reply queue.
    pub async fn release(mut self) {
        // ---
        self.released = true;
        if let Err(e) = self.channel.close().await {
            log_warn!("failed to close reply channel for {}: {e}", self.address);
        }
    }
}

impl Drop for ReplyLeg {
    fn drop(&mut self) {
        // ---
        if self.released {
            return;
        }

        // Cancelled before release(): close from a background task if a
        // runtime is still around.
        let channel = Arc::clone(&self.channel);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = channel.close().await;
            });
        }
    }
}

/// Publish `payload` to `destination` on `channel` with correlation metadata.
///
/// # Errors
///
/// Returns [`RpcError::PublishFailed`] if the broker refuses the message.
pub async fn publish(
    channel: &ChannelPtr,
    destination: &Address,
    reply_to: Option<&Address>,
    correlation_id: &CorrelationId,
    payload: Bytes,
) -> Result<()> {
    // ---
    let mut message = Message::new(destination.clone(), payload)
        .with_correlation_id(correlation_id.as_str())
        .with_content_type(CONTENT_TYPE);

    if let Some(reply_to) = reply_to {
        message = message.with_reply_to(reply_to.clone());
    }

    channel
        .publish(message)
        .await
        .map_err(RpcError::PublishFailed)
}
