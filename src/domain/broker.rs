// src/domain/broker.rs

//! Broker domain abstractions.
//!
//! These traits describe the slice of a queueing broker that request/reply
//! needs: connections that open channels, channels that declare queues,
//! publish to them and consume from them, and deliveries that may need an
//! explicit acknowledgment.
//!
//! Routing follows the default-exchange model: a message published to an
//! [`Address`] lands in the queue of that name, or is dropped when no such
//! queue exists.
//!
//! Concrete implementations live under `src/transport/`. The in-memory broker
//! is the reference for these semantics.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::BrokerError;

/// Result of a raw broker operation.
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// A queue name used as a routing destination.
///
/// Addresses are immutable, cheap to clone, and safe to share across threads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Properties of a declared queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct QueueOptions {
    /// Survive a broker restart.
    pub durable: bool,
    /// Only the declaring connection may consume; removed with it.
    pub exclusive: bool,
    /// Removed once its last consumer goes away.
    pub auto_delete: bool,
}

impl QueueOptions {
    /// Private per-call reply queue: transient, exclusive, auto-deleting.
    pub fn private_reply() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }

    /// Shared request queue: transient but outliving any single consumer so
    /// several server processes can share it.
    pub fn shared_requests() -> Self {
        Self {
            durable: false,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// How deliveries of a consumer are acknowledged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckMode {
    /// The broker considers a message handled once delivered.
    Auto,
    /// The consumer must [`ack`](Delivery::ack) or [`reject`](Delivery::reject)
    /// each delivery. Unacknowledged deliveries count against the prefetch
    /// window and are redelivered if the channel goes away.
    Manual,
}

/// An outbound message.
///
/// Correlation id and reply address travel as transport metadata so brokers
/// and tools can route and inspect without parsing the body.
#[derive(Clone, Debug)]
pub struct Message {
    pub destination: Address,
    pub payload: Bytes,
    pub correlation_id: Option<Arc<str>>,
    pub reply_to: Option<Address>,
    pub content_type: Option<Arc<str>>,
}

impl Message {
    pub fn new(destination: Address, payload: Bytes) -> Self {
        // ---
        Self {
            destination,
            payload,
            correlation_id: None,
            reply_to: None,
            content_type: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, address: Address) -> Self {
        self.reply_to = Some(address);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<Arc<str>>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Settles a manually acknowledged delivery.
#[async_trait::async_trait]
pub trait Acknowledger: Send + Sync {
    /// Mark the delivery handled.
    async fn ack(&self) -> BrokerResult<()>;

    /// Discard the delivery without redelivery.
    async fn reject(&self) -> BrokerResult<()>;
}

/// A message received from a queue.
pub struct Delivery {
    pub payload: Bytes,
    pub correlation_id: Option<Arc<str>>,
    pub reply_to: Option<Address>,
    pub content_type: Option<Arc<str>>,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl Delivery {
    /// Build a delivery from a consumed message. `acker` is `None` for
    /// auto-acknowledged consumers.
    pub fn new(message: Message, acker: Option<Arc<dyn Acknowledger>>) -> Self {
        // ---
        Self {
            payload: message.payload,
            correlation_id: message.correlation_id,
            reply_to: message.reply_to,
            content_type: message.content_type,
            acker,
        }
    }

    /// Acknowledge the delivery. A no-op under [`AckMode::Auto`].
    pub async fn ack(&self) -> BrokerResult<()> {
        match &self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// Reject the delivery without requeueing. A no-op under [`AckMode::Auto`].
    pub async fn reject(&self) -> BrokerResult<()> {
        match &self.acker {
            Some(acker) => acker.reject().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .field("correlation_id", &self.correlation_id)
            .field("reply_to", &self.reply_to)
            .field("content_type", &self.content_type)
            .field("manual_ack", &self.acker.is_some())
            .finish()
    }
}

/// Stream of deliveries from one consumer.
///
/// The stream ends when the consumer is cancelled or its channel closes.
/// Dropping it stops delivery to this consumer.
pub struct DeliveryStream {
    pub inbox: mpsc::UnboundedReceiver<Delivery>,
}

impl DeliveryStream {
    pub async fn next(&mut self) -> Option<Delivery> {
        self.inbox.recv().await
    }
}

/// A channel on a broker connection.
///
/// # Notes
///
/// This trait uses `async_trait`; consumers should treat its methods as
/// ordinary `async fn`s.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// Declare a queue, returning its name. An empty `name` asks the broker
    /// to generate a unique one.
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> BrokerResult<String>;

    /// Limit unacknowledged deliveries on this channel (0 = unlimited).
    async fn set_prefetch(&self, count: u16) -> BrokerResult<()>;

    /// Attach a consumer to `queue`.
    async fn consume(&self, queue: &str, mode: AckMode) -> BrokerResult<DeliveryStream>;

    /// Hand a message to the broker. Returns once the broker client accepted
    /// it; broker-side confirmation is not awaited.
    async fn publish(&self, message: Message) -> BrokerResult<()>;

    /// Close the channel, cancelling its consumers.
    async fn close(&self) -> BrokerResult<()>;
}

/// An established broker connection.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Label used in log lines.
    fn connection_id(&self) -> &str;

    async fn open_channel(&self) -> BrokerResult<ChannelPtr>;

    async fn close(&self) -> BrokerResult<()>;
}

/// Shared channel pointer.
pub type ChannelPtr = Arc<dyn Channel>;

/// Shared connection pointer.
///
/// `.clone()` is cheap and all clones share the same underlying connection.
pub type ConnectionPtr = Arc<dyn Connection>;
