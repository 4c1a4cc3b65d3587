//! Shared operation set for the echo demos.
//!
//! Client and server must agree on the tag enum and both unions. In a real
//! application these live in their own crate that both sides depend on:
//! ```text
//! my-app/
//! ├── my-rpc-types/     # Op, Payload, Output, Schema impl
//! ├── my-server/        # Depends on my-rpc-types
//! └── my-client/        # Depends on my-rpc-types
//! ```

#![allow(dead_code)]

use broker_rpc::{tagged_union, HandlerRegistry, Schema};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum Op {
    Echo,
    Add,
    Shout,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddArgs {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug)]
pub enum Payload {
    Echo(String),
    Add(AddArgs),
    Shout(String),
}

#[derive(Debug)]
pub enum Output {
    Echo(String),
    Add(i64),
    Shout(String),
}

tagged_union!(Payload, Op { Echo, Add, Shout });
tagged_union!(Output, Op { Echo, Add, Shout });

pub struct EchoOps;

impl Schema for EchoOps {
    type Tag = Op;
    type Payload = Payload;
    type Output = Output;
}

/// Handlers for `Echo` and `Add`. `Shout` is left out on purpose so the
/// client can show a "not implemented" reply.
pub fn registry() -> HandlerRegistry<EchoOps> {
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
                Payload::Add(AddArgs { a, b }) => a
                    .checked_add(b)
                    .map(Output::Add)
                    .ok_or_else(|| "overflow".into()),
                other => Err(format!("unexpected payload {other:?}").into()),
            }
        })
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
