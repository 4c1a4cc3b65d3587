//! In-memory broker implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! broker traits. It is intended for tests, single-process deployments, and as
//! the reference for broker semantics.
//!
//! ## Reference Semantics
//!
//! - Routing is by queue name (default exchange). A message for a queue that
//!   does not exist is dropped, which is how late replies to a released reply
//!   queue disappear.
//! - An empty queue name on declare yields a generated `amq.gen-…` name.
//! - Exclusive queues belong to the declaring connection: other connections
//!   cannot consume them, and they are removed when it closes.
//! - Auto-delete queues are removed once the last consumer goes away.
//! - Deliveries are round-robined over consumers. Manually acknowledged
//!   consumers receive at most `prefetch` unacknowledged deliveries per
//!   channel (0 = unlimited).
//! - Closing a channel requeues its unacknowledged deliveries at the front of
//!   their queues.
//!
//! ## Non-Goals
//!
//! Persistence, exchanges other than the default one, and broker failure
//! modes are not modelled.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use tokio::sync::mpsc;

use crate::{
    // ---
    log_debug,
    log_info,
    AckMode,
    Acknowledger,
    BrokerError,
    BrokerResult,
    Channel,
    ChannelPtr,
    Connection,
    ConnectionPtr,
    CorrelationId,
    Delivery,
    DeliveryStream,
    Message,
    QueueOptions,
};

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// Every mutation of the broker state completes before the guard drops, and
/// no code path panics while holding it, so a poisoned guard still protects
/// consistent data.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared in-process broker.
///
/// All connections created from the same `MemoryBroker` see the same queues,
/// exactly as clients of one real broker would.
///
/// ```
/// # async fn example() -> broker_rpc::Result<()> {
/// use broker_rpc::MemoryBroker;
///
/// let broker = MemoryBroker::new();
/// let server_conn = broker.connect("server");
/// let client_conn = broker.connect("client");
/// # let _ = (server_conn, client_conn);
/// # Ok(())
/// # }
/// ```
pub struct MemoryBroker {
    me: Weak<MemoryBroker>,
    next_id: AtomicU64,
    state: Mutex<BrokerState>,
}

#[derive(Default)]
struct BrokerState {
    connections: HashSet<u64>,
    channels: HashMap<u64, ChannelState>,
    queues: HashMap<String, QueueState>,
}

struct ChannelState {
    connection_id: u64,
    prefetch: u16,
    /// delivery tag -> (queue, message)
    unacked: HashMap<u64, (String, Message)>,
}

impl ChannelState {
    fn has_credit(&self) -> bool {
        self.prefetch == 0 || self.unacked.len() < usize::from(self.prefetch)
    }
}

struct QueueState {
    options: QueueOptions,
    owner: u64,
    ready: VecDeque<Message>,
    consumers: Vec<ConsumerState>,
    next_consumer: usize,
    had_consumer: bool,
}

impl QueueState {
    fn is_abandoned(&self) -> bool {
        self.options.auto_delete && self.had_consumer && self.consumers.is_empty()
    }
}

struct ConsumerState {
    channel_id: u64,
    mode: AckMode,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl MemoryBroker {
    /// Create a new, empty broker.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            next_id: AtomicU64::new(1),
            state: Mutex::new(BrokerState::default()),
        })
    }

    /// Open a connection to this broker. `label` only appears in logs.
    pub fn connect(&self, label: impl Into<String>) -> ConnectionPtr {
        // ---
        let id = self.next_id();
        lock_ignore_poison(&self.state).connections.insert(id);

        let label = label.into();
        log_info!("[{label}] memory broker connection {id} opened");

        Arc::new(MemoryConnection {
            broker: self.strong(),
            id,
            label,
        })
    }

    /// Whether a queue of this name currently exists.
    pub fn queue_exists(&self, name: &str) -> bool {
        lock_ignore_poison(&self.state).queues.contains_key(name)
    }

    /// Number of messages waiting in a queue, not counting deliveries that
    /// are out and unacknowledged.
    pub fn ready_count(&self, name: &str) -> Option<usize> {
        lock_ignore_poison(&self.state)
            .queues
            .get(name)
            .map(|q| q.ready.len())
    }

    /// Number of queues currently declared.
    pub fn queue_count(&self) -> usize {
        lock_ignore_poison(&self.state).queues.len()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn strong(&self) -> Arc<MemoryBroker> {
        // `self` is only reachable through an `Arc` built by `new()`.
        match self.me.upgrade() {
            Some(me) => me,
            None => unreachable!("memory broker used after drop"),
        }
    }

    fn open_channel(&self, connection_id: u64) -> BrokerResult<u64> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        if !state.connections.contains(&connection_id) {
            return Err(BrokerError::new("connection is closed"));
        }

        let id = self.next_id();
        state.channels.insert(
            id,
            ChannelState {
                connection_id,
                prefetch: 0,
                unacked: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn declare(&self, channel_id: u64, name: &str, options: QueueOptions) -> BrokerResult<String> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let connection_id = match state.channels.get(&channel_id) {
            Some(ch) => ch.connection_id,
            None => return Err(BrokerError::new("channel is closed")),
        };

        let name = if name.is_empty() {
            format!("amq.gen-{}", CorrelationId::generate())
        } else {
            name.to_string()
        };

        if let Some(existing) = state.queues.get(&name) {
            if existing.options.exclusive && existing.owner != connection_id {
                return Err(BrokerError::new(format!(
                    "queue '{name}' is exclusive to another connection"
                )));
            }
            if existing.options != options {
                return Err(BrokerError::new(format!(
                    "queue '{name}' already declared with different options"
                )));
            }
            return Ok(name);
        }

        state.queues.insert(
            name.clone(),
            QueueState {
                options,
                owner: connection_id,
                ready: VecDeque::new(),
                consumers: Vec::new(),
                next_consumer: 0,
                had_consumer: false,
            },
        );
        log_debug!("memory broker declared queue '{name}' {options:?}");
        Ok(name)
    }

    fn set_prefetch(&self, channel_id: u64, count: u16) -> BrokerResult<()> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let channel = state
            .channels
            .get_mut(&channel_id)
            .ok_or_else(|| BrokerError::new("channel is closed"))?;
        channel.prefetch = count;
        Ok(())
    }

    fn consume(&self, channel_id: u64, queue: &str, mode: AckMode) -> BrokerResult<DeliveryStream> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let connection_id = match state.channels.get(&channel_id) {
            Some(ch) => ch.connection_id,
            None => return Err(BrokerError::new("channel is closed")),
        };

        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::new(format!("no queue '{queue}'")))?;

        if q.options.exclusive && q.owner != connection_id {
            return Err(BrokerError::new(format!(
                "queue '{queue}' is exclusive to another connection"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        q.consumers.push(ConsumerState {
            channel_id,
            mode,
            tx,
        });
        q.had_consumer = true;

        self.pump(&mut state, queue);
        Ok(DeliveryStream { inbox: rx })
    }

    fn publish(&self, channel_id: u64, message: Message) -> BrokerResult<()> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        if !state.channels.contains_key(&channel_id) {
            return Err(BrokerError::new("channel is closed"));
        }

        let queue = message.destination.as_str().to_string();
        match state.queues.get_mut(&queue) {
            Some(q) => q.ready.push_back(message),
            None => {
                log_debug!(
                    "memory broker dropping unroutable message for '{queue}' (correlation id {:?})",
                    message.correlation_id
                );
                return Ok(());
            }
        }

        self.pump(&mut state, &queue);
        Ok(())
    }

    fn settle(&self, channel_id: u64, tag: u64, accepted: bool) -> BrokerResult<()> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let channel = state
            .channels
            .get_mut(&channel_id)
            .ok_or_else(|| BrokerError::new("channel is closed"))?;

        let (queue, _message) = channel
            .unacked
            .remove(&tag)
            .ok_or_else(|| BrokerError::new(format!("unknown delivery tag {tag}")))?;

        if !accepted {
            log_debug!("memory broker discarded rejected delivery {tag} from '{queue}'");
        }

        // Credit freed on this channel may unblock any queue it consumes.
        let queues: Vec<String> = state.queues.keys().cloned().collect();
        for name in queues {
            self.pump(&mut state, &name);
        }
        Ok(())
    }

    fn close_channel(&self, channel_id: u64) {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let Some(channel) = state.channels.remove(&channel_id) else {
            return;
        };

        for q in state.queues.values_mut() {
            q.consumers.retain(|c| c.channel_id != channel_id);
        }

        let mut unacked: Vec<(u64, (String, Message))> = channel.unacked.into_iter().collect();
        unacked.sort_by(|a, b| b.0.cmp(&a.0));
        for (_tag, (queue, message)) in unacked {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.ready.push_front(message);
            }
        }

        state.queues.retain(|name, q| {
            if q.is_abandoned() {
                log_debug!("memory broker deleted auto-delete queue '{name}'");
                return false;
            }
            true
        });

        let queues: Vec<String> = state.queues.keys().cloned().collect();
        for name in queues {
            self.pump(&mut state, &name);
        }
    }

    fn close_connection(&self, connection_id: u64) {
        // ---
        let channel_ids: Vec<u64> = {
            let mut state = lock_ignore_poison(&self.state);
            state.connections.remove(&connection_id);
            state
                .channels
                .iter()
                .filter(|(_, ch)| ch.connection_id == connection_id)
                .map(|(id, _)| *id)
                .collect()
        };

        for id in channel_ids {
            self.close_channel(id);
        }

        let mut state = lock_ignore_poison(&self.state);
        state
            .queues
            .retain(|_, q| !(q.options.exclusive && q.owner == connection_id));
    }

    /// Move ready messages of `queue` to consumers with credit.
    fn pump(&self, state: &mut BrokerState, queue: &str) {
        // ---
        let BrokerState {
            channels, queues, ..
        } = state;

        let Some(q) = queues.get_mut(queue) else {
            return;
        };

        while !q.ready.is_empty() && !q.consumers.is_empty() {
            let n = q.consumers.len();
            let picked = (0..n)
                .map(|offset| (q.next_consumer + offset) % n)
                .find(|&idx| {
                    let c = &q.consumers[idx];
                    !c.tx.is_closed()
                        && match c.mode {
                            AckMode::Auto => true,
                            AckMode::Manual => channels
                                .get(&c.channel_id)
                                .map(ChannelState::has_credit)
                                .unwrap_or(false),
                        }
                });

            let Some(idx) = picked else {
                break;
            };
            q.next_consumer = (idx + 1) % n;

            let Some(message) = q.ready.pop_front() else {
                break;
            };
            let consumer = &q.consumers[idx];

            let (acker, tag) = match consumer.mode {
                AckMode::Auto => (None, None),
                AckMode::Manual => {
                    let tag = self.next_id();
                    if let Some(ch) = channels.get_mut(&consumer.channel_id) {
                        ch.unacked.insert(tag, (queue.to_string(), message.clone()));
                    }
                    let acker: Arc<dyn Acknowledger> = Arc::new(MemoryAcker {
                        broker: self.me.clone(),
                        channel_id: consumer.channel_id,
                        tag,
                    });
                    (Some(acker), Some(tag))
                }
            };

            if consumer.tx.send(Delivery::new(message.clone(), acker)).is_err() {
                // Receiver went away between the check and the send.
                if let (Some(tag), Some(ch)) = (tag, channels.get_mut(&consumer.channel_id)) {
                    ch.unacked.remove(&tag);
                }
                q.ready.push_front(message);
            }
        }

        q.consumers.retain(|c| !c.tx.is_closed());
        if q.is_abandoned() {
            queues.remove(queue);
            log_debug!("memory broker deleted auto-delete queue '{queue}'");
        }
    }
}

/// Process-global broker used by [`crate::connect`] when no AMQP transport is
/// configured.
static GLOBAL_BROKER: OnceLock<Arc<MemoryBroker>> = OnceLock::new();

pub(crate) fn global_broker() -> Arc<MemoryBroker> {
    GLOBAL_BROKER.get_or_init(MemoryBroker::new).clone()
}

struct MemoryAcker {
    broker: Weak<MemoryBroker>,
    channel_id: u64,
    tag: u64,
}

#[async_trait::async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> BrokerResult<()> {
        match self.broker.upgrade() {
            Some(broker) => broker.settle(self.channel_id, self.tag, true),
            None => Err(BrokerError::new("broker is gone")),
        }
    }

    async fn reject(&self) -> BrokerResult<()> {
        match self.broker.upgrade() {
            Some(broker) => broker.settle(self.channel_id, self.tag, false),
            None => Err(BrokerError::new("broker is gone")),
        }
    }
}

struct MemoryConnection {
    broker: Arc<MemoryBroker>,
    id: u64,
    label: String,
}

#[async_trait::async_trait]
impl Connection for MemoryConnection {
    // ---
    fn connection_id(&self) -> &str {
        &self.label
    }

    async fn open_channel(&self) -> BrokerResult<ChannelPtr> {
        let id = self.broker.open_channel(self.id)?;
        log_debug!("[{}] opened channel {id}", self.label);
        Ok(Arc::new(MemoryChannel {
            broker: self.broker.clone(),
            id,
        }))
    }

    async fn close(&self) -> BrokerResult<()> {
        self.broker.close_connection(self.id);
        log_info!("[{}] memory broker connection {} closed", self.label, self.id);
        Ok(())
    }
}

struct MemoryChannel {
    broker: Arc<MemoryBroker>,
    id: u64,
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    // ---
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> BrokerResult<String> {
        self.broker.declare(self.id, name, options)
    }

    async fn set_prefetch(&self, count: u16) -> BrokerResult<()> {
        self.broker.set_prefetch(self.id, count)
    }

    async fn consume(&self, queue: &str, mode: AckMode) -> BrokerResult<DeliveryStream> {
        self.broker.consume(self.id, queue, mode)
    }

    async fn publish(&self, message: Message) -> BrokerResult<()> {
        self.broker.publish(self.id, message)
    }

    async fn close(&self) -> BrokerResult<()> {
        self.broker.close_channel(self.id);
        Ok(())
    }
}
