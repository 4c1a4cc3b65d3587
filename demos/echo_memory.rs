//! Client and server in one process over the in-memory broker.
//!
//! ```text
//! RUST_LOG=broker_rpc=debug cargo run --example echo_memory
//! ```

mod common;

use std::sync::Arc;

use broker_rpc::{connect, Result, RpcClient, RpcConfig, RpcError, RpcServer};

use common::{AddArgs, EchoOps, Payload};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    common::init_logging();
    let config = RpcConfig::memory("echo");

    let server = RpcServer::<EchoOps>::new(connect(&config).await?, Arc::new(common::registry()), &config)
        .spawn()
        .await?;

    let client = RpcClient::<EchoOps>::new(connect(&config).await?, &config);

    let echoed = client.call(Payload::Echo("hello".into())).await?;
    println!("echo  -> {echoed:?}");

    let sum = client.call(Payload::Add(AddArgs { a: 20, b: 3 })).await?;
    println!("20+3  -> {sum:?}");

    match client.call(Payload::Shout("hello".into())).await {
        Err(RpcError::NotImplemented(op)) => println!("shout -> {op} is not implemented"),
        other => println!("shout -> {other:?}"),
    }

    let overflow = client.call(Payload::Add(AddArgs { a: i64::MAX, b: 1 })).await;
    println!("max+1 -> {overflow:?}");

    server.shutdown().await?;
    client.close().await?;
    Ok(())
}
