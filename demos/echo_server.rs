//! Echo server over RabbitMQ.
//!
//! ```text
//! docker run -d -p 5672:5672 rabbitmq:3
//! RUST_LOG=info cargo run --example echo_server --features transport_lapin
//! ```

mod common;

use std::sync::Arc;

use broker_rpc::{connect, Result, RpcConfig, RpcServer};

use common::EchoOps;

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    common::init_logging();

    let uri = std::env::var("AMQP_URI").unwrap_or_else(|_| "amqp://localhost:5672/%2f".into());
    let config = RpcConfig::with_broker(uri, "echo-server").with_request_queue("echo.requests");

    let connection = connect(&config).await?;
    let server = RpcServer::<EchoOps>::new(connection.clone(), Arc::new(common::registry()), &config);

    println!("serving {} (ctrl-c to stop)", config.request_queue);
    let handle = server.spawn().await?;

    let _ = tokio::signal::ctrl_c().await;

    handle.shutdown().await?;
    connection.close().await.map_err(broker_rpc::RpcError::CloseFailed)?;
    Ok(())
}
