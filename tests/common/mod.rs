// tests/common/mod.rs
//! Operation set and server fixture shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use broker_rpc::{
    // ---
    tagged_union,
    ConnectionPtr,
    HandlerRegistry,
    RpcConfig,
    RpcError,
    RpcServer,
    Schema,
    ServerHandle,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum Op {
    Echo,
    Add,
    Fail,
    Sleep,
    Unhandled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddArgs {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Echo(String),
    Add(AddArgs),
    Fail(String),
    /// Milliseconds to sleep before answering.
    Sleep(u64),
    Unhandled(()),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Echo(String),
    Add(i64),
    Fail(()),
    Sleep(u64),
    Unhandled(()),
}

tagged_union!(Payload, Op { Echo, Add, Fail, Sleep, Unhandled });
tagged_union!(Output, Op { Echo, Add, Fail, Sleep, Unhandled });

pub struct TestOps;

impl Schema for TestOps {
    type Tag = Op;
    type Payload = Payload;
    type Output = Output;
}

/// Registry with a handler for every operation except `Unhandled`.
pub fn registry() -> HandlerRegistry<TestOps> {
    // ---
    HandlerRegistry::new()
        .register(Op::Echo, |p| async move {
            match p {
                Payload::Echo(text) => Ok(Output::Echo(text)),
                other => Err(format!("unexpected payload {other:?}").into()),
            }
        })
        .register(Op::Add, |p| async move {
            match p {
                Payload::Add(args) => Ok(Output::Add(args.a + args.b)),
                other => Err(format!("unexpected payload {other:?}").into()),
            }
        })
        .register(Op::Fail, |p| async move {
            match p {
                Payload::Fail(message) => Err(message.into()),
                other => Err(format!("unexpected payload {other:?}").into()),
            }
        })
        .register(Op::Sleep, |p| async move {
            match p {
                Payload::Sleep(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(Output::Sleep(ms))
                }
                other => Err(format!("unexpected payload {other:?}").into()),
            }
        })
}

/// Failures seen by a server's error handler, by kind.
pub type ErrorLog = mpsc::UnboundedReceiver<(&'static str, String)>;

pub fn kind(err: &RpcError) -> &'static str {
    // ---
    match err {
        RpcError::DecodeFailed(_) => "decode",
        RpcError::MissingReplyAddress(_) => "missing-reply-to",
        RpcError::PublishFailed(_) => "publish",
        RpcError::AcknowledgeFailed(_) => "ack",
        RpcError::EncodeFailed(_) => "encode",
        _ => "other",
    }
}

/// Start a server on `connection` and capture what its error handler sees.
pub async fn start_server(connection: ConnectionPtr, config: &RpcConfig) -> (ServerHandle, ErrorLog) {
    start_server_with(connection, registry(), config).await
}

/// Like [`start_server`] with a caller-supplied registry.
pub async fn start_server_with(
    connection: ConnectionPtr,
    registry: HandlerRegistry<TestOps>,
    config: &RpcConfig,
) -> (ServerHandle, ErrorLog) {
    // ---
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = RpcServer::<TestOps>::new(connection, Arc::new(registry), config)
        .with_error_handler(move |e| {
            let _ = tx.send((kind(e), e.to_string()));
        })
        .spawn()
        .await
        .expect("server setup failed");
    (handle, rx)
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
