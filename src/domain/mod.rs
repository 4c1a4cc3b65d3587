//! Domain layer public interface.
//!
//! This module defines the broker abstraction the client engine and the
//! dispatch server are written against. It names no concrete broker client.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod broker;

pub use broker::{
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
