//! Broker implementations and the per-call reply leg.
//!
//! This module provides concrete implementations of the domain-level
//! `Connection`/`Channel` traits. Broker-backed implementations are hidden
//! behind feature flags.
//!
//! Client and server code must not depend on broker-specific types.

mod amqp;
mod memory;
mod reply_leg;

#[cfg(feature = "transport_lapin")]
pub use amqp::AmqpConnection;

pub use memory::MemoryBroker;
pub(crate) use memory::global_broker;

pub use reply_leg::{publish, ReplyLeg};
