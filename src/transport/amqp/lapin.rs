//! AMQP broker implementation using `lapin`.
//!
//! Maps the domain broker traits onto AMQP 0-9-1 (RabbitMQ):
//!
//! - every [`Channel`](crate::Channel) is one AMQP channel on a shared
//!   connection,
//! - queues are declared on the default exchange, so publishing to an
//!   [`Address`] routes by queue name,
//! - correlation id, reply address and content type travel as AMQP message
//!   properties.
//!
//! ## Consumers
//!
//! Each `consume()` starts a forwarding task that drains the lapin consumer
//! stream into an unbounded inbox. The task ends when the consumer is
//! cancelled, the channel closes, or the inbox is dropped. Manually
//! acknowledged deliveries keep their lapin acker; rejection never requeues.
//!
//! Connection failures are logged at error level (or `eprintln!` when logging
//! is disabled) before they are returned.

use std::sync::{Arc, Mutex};

use lapin::{
    //
    options::{
        //
        BasicAckOptions,
        BasicConsumeOptions,
        BasicPublishOptions,
        BasicQosOptions,
        BasicRejectOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties,
    Connection as LapinConnection,
    ConnectionProperties,
};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    AckMode,
    Acknowledger,
    Address,
    BrokerError,
    BrokerResult,
    Channel,
    ChannelPtr,
    Connection,
    ConnectionPtr,
    Delivery,
    DeliveryStream,
    Message,
    QueueOptions,
    Result,
    RpcError,
};

fn broker_error(context: &str, err: lapin::Error) -> BrokerError {
    BrokerError::new(format!("amqp: {context}: {err}"))
}

/// `uri` with any `user:password@` replaced, for log lines.
fn redact_uri(uri: &str) -> String {
    // ---
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => uri.to_string(),
    }
}

/// AMQP connection shared by all channels opened from it.
pub struct AmqpConnection {
    // ---
    connection_id: String,
    connection: LapinConnection,
}

impl AmqpConnection {
    /// Connect to the broker at `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ConnectFailed`] if the URI cannot be parsed or the
    /// broker is unreachable.
    pub async fn connect(connection_id: &str, uri: &str) -> Result<ConnectionPtr> {
        // ---
        log_info!("[{connection_id}] Connecting to AMQP broker: {}", redact_uri(uri));

        let connection = LapinConnection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| {
                let err = broker_error("connection failed", e);
                log_error!("[{connection_id}] {err}");
                RpcError::ConnectFailed(err)
            })?;

        log_info!("[{connection_id}] Connected to AMQP broker");

        Ok(Arc::new(Self {
            connection_id: connection_id.to_string(),
            connection,
        }))
    }
}

#[async_trait::async_trait]
impl Connection for AmqpConnection {
    // ---
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    async fn open_channel(&self) -> BrokerResult<ChannelPtr> {
        // ---
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| broker_error("channel creation failed", e))?;

        log_debug!("[{}] Created AMQP channel", self.connection_id);

        Ok(Arc::new(AmqpChannel {
            connection_id: self.connection_id.clone(),
            channel,
            consumers: Mutex::new(Vec::new()),
        }))
    }

    async fn close(&self) -> BrokerResult<()> {
        // ---
        self.connection
            .close(200, "Normal shutdown".into())
            .await
            .map_err(|e| broker_error("connection close failed", e))?;

        log_info!("[{}] AMQP connection closed", self.connection_id);
        Ok(())
    }
}

struct AmqpChannel {
    // ---
    connection_id: String,
    channel: lapin::Channel,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl AmqpChannel {
    fn track(&self, handle: JoinHandle<()>) {
        let mut consumers = match self.consumers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        consumers.retain(|h| !h.is_finished());
        consumers.push(handle);
    }

    fn abort_consumers(&self) {
        let mut consumers = match self.consumers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handle in consumers.drain(..) {
            handle.abort();
        }
    }
}

#[async_trait::async_trait]
impl Channel for AmqpChannel {
    // ---
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> BrokerResult<String> {
        // ---
        let queue_opts = QueueDeclareOptions {
            passive: false,
            durable: options.durable,
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
            nowait: false,
        };

        let queue = self
            .channel
            .queue_declare(name.into(), queue_opts, FieldTable::default())
            .await
            .map_err(|e| broker_error("queue declare failed", e))?;

        let declared = queue.name().as_str().to_string();
        log_debug!("[{}] Declared queue: {declared}", self.connection_id);
        Ok(declared)
    }

    async fn set_prefetch(&self, count: u16) -> BrokerResult<()> {
        // ---
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| broker_error("qos failed", e))
    }

    async fn consume(&self, queue: &str, mode: AckMode) -> BrokerResult<DeliveryStream> {
        // ---
        let options = BasicConsumeOptions {
            no_ack: mode == AckMode::Auto,
            ..BasicConsumeOptions::default()
        };

        let consumer = self
            .channel
            .basic_consume(
                queue.into(),
                &format!("{}-{queue}", self.connection_id),
                options,
                FieldTable::default(),
            )
            .await
            .map_err(|e| broker_error("consume failed", e))?;

        log_debug!("[{}] Started consuming queue: {queue}", self.connection_id);

        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = self.connection_id.clone();
        let queue_name = queue.to_string();

        let handle = tokio::spawn(async move {
            use futures_lite::stream::StreamExt;

            let mut consumer = consumer;
            while let Some(delivery_result) = consumer.next().await {
                match delivery_result {
                    Ok(delivery) => {
                        let delivery = into_delivery(delivery, mode);
                        if tx.send(delivery).is_err() {
                            log_debug!("[{connection_id}] Inbox for {queue_name} dropped");
                            break;
                        }
                    }
                    Err(e) => {
                        log_error!("[{connection_id}] Consumer error on {queue_name}: {e}");
                        break;
                    }
                }
            }

            log_debug!("[{connection_id}] Consumer task ended for queue: {queue_name}");
        });

        self.track(handle);
        Ok(DeliveryStream { inbox: rx })
    }

    async fn publish(&self, message: Message) -> BrokerResult<()> {
        // ---
        let mut properties = BasicProperties::default();
        if let Some(id) = &message.correlation_id {
            properties = properties.with_correlation_id(id.to_string().into());
        }
        if let Some(reply_to) = &message.reply_to {
            properties = properties.with_reply_to(reply_to.as_str().into());
        }
        if let Some(content_type) = &message.content_type {
            properties = properties.with_content_type(content_type.to_string().into());
        }

        let queue = message.destination.as_str();
        self.channel
            .basic_publish(
                "".into(),    // default exchange
                queue.into(), // routing key = queue name
                BasicPublishOptions::default(),
                &message.payload,
                properties,
            )
            .await
            .map_err(|e| broker_error("publish failed", e))?;

        log_debug!("[{}] Published to queue: {queue}", self.connection_id);
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        // ---
        self.abort_consumers();
        self.channel
            .close(200, "Normal shutdown".into())
            .await
            .map_err(|e| broker_error("channel close failed", e))
    }
}

fn into_delivery(delivery: lapin::message::Delivery, mode: AckMode) -> Delivery {
    // ---
    let props = &delivery.properties;

    let mut message = Message::new(Address::from(""), delivery.data.into());
    if let Some(id) = props.correlation_id() {
        message = message.with_correlation_id(id.as_str());
    }
    if let Some(reply_to) = props.reply_to() {
        message = message.with_reply_to(Address::from(reply_to.as_str()));
    }
    if let Some(content_type) = props.content_type() {
        message = message.with_content_type(content_type.as_str());
    }

    let acker: Option<Arc<dyn Acknowledger>> = match mode {
        AckMode::Auto => None,
        AckMode::Manual => Some(Arc::new(LapinAcker {
            acker: delivery.acker,
        })),
    };

    Delivery::new(message, acker)
}

struct LapinAcker {
    acker: lapin::acker::Acker,
}

#[async_trait::async_trait]
impl Acknowledger for LapinAcker {
    async fn ack(&self) -> BrokerResult<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| broker_error("ack failed", e))
    }

    async fn reject(&self) -> BrokerResult<()> {
        self.acker
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map(|_| ())
            .map_err(|e| broker_error("reject failed", e))
    }
}
