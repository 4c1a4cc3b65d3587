//! Echo client over RabbitMQ. Start `echo_server` first.
//!
//! ```text
//! cargo run --example echo_client --features transport_lapin -- "hello there"
//! ```

mod common;

use std::time::Duration;

use broker_rpc::{connect, Result, RpcClient, RpcConfig};

use common::{AddArgs, EchoOps, Payload};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    common::init_logging();

    let uri = std::env::var("AMQP_URI").unwrap_or_else(|_| "amqp://localhost:5672/%2f".into());
    let text = std::env::args().nth(1).unwrap_or_else(|| "hello".into());

    let config = RpcConfig::with_broker(uri, "echo-client")
        .with_request_queue("echo.requests")
        .with_request_timeout(Duration::from_secs(5));

    let client = RpcClient::<EchoOps>::new(connect(&config).await?, &config);

    let echoed = client.call(Payload::Echo(text)).await?;
    println!("echo -> {echoed:?}");

    let sum = client.call(Payload::Add(AddArgs { a: 40, b: 2 })).await?;
    println!("add  -> {sum:?}");

    // Degrades to None instead of an error.
    let shout = client.call_lossy(Payload::Shout("quiet".into())).await;
    println!("shout -> {shout:?}");

    client.close().await?;
    Ok(())
}
