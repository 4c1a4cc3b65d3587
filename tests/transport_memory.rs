// tests/transport_memory.rs

use bytes::Bytes;
use tokio::time::{timeout, Duration};

use broker_rpc::{
    // ---
    AckMode,
    Address,
    CorrelationId,
    MemoryBroker,
    Message,
    QueueOptions,
};

#[tokio::test]
async fn memory_publish_then_consume_delivers_metadata() {
    // ---
    // Arrange
    // ---
    let broker = MemoryBroker::new();
    let conn = broker.connect("mpcd");
    let channel = conn.open_channel().await.expect("open channel failed");

    channel
        .declare_queue("test.queue", QueueOptions::shared_requests())
        .await
        .expect("declare failed");

    let id = CorrelationId::generate();
    let message = Message::new(Address::from("test.queue"), Bytes::from_static(b"hello"))
        .with_correlation_id(id.as_str())
        .with_reply_to(Address::from("replies"))
        .with_content_type("text/plain");

    // ---
    // Act
    // ---
    channel.publish(message).await.expect("publish failed");
    let mut stream = channel
        .consume("test.queue", AckMode::Auto)
        .await
        .expect("consume failed");

    // ---
    // Assert
    // ---
    let received = timeout(Duration::from_millis(100), stream.next())
        .await
        .expect("timed out waiting for message")
        .expect("stream closed unexpectedly");

    assert_eq!(received.payload, Bytes::from_static(b"hello"));
    assert_eq!(received.correlation_id.as_deref(), Some(id.as_str()));
    assert_eq!(received.reply_to, Some(Address::from("replies")));
    assert_eq!(received.content_type.as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn memory_shared_queue_round_robins_consumers() {
    // ---
    let broker = MemoryBroker::new();
    let a = broker.connect("a").open_channel().await.unwrap();
    let b = broker.connect("b").open_channel().await.unwrap();

    a.declare_queue("work", QueueOptions::shared_requests())
        .await
        .unwrap();
    b.declare_queue("work", QueueOptions::shared_requests())
        .await
        .unwrap();

    let mut sa = a.consume("work", AckMode::Auto).await.unwrap();
    let mut sb = b.consume("work", AckMode::Auto).await.unwrap();

    for _ in 0..4 {
        a.publish(Message::new(Address::from("work"), Bytes::from_static(b"job")))
            .await
            .unwrap();
    }

    let mut got_a = 0;
    let mut got_b = 0;
    while sa.inbox.try_recv().is_ok() {
        got_a += 1;
    }
    while sb.inbox.try_recv().is_ok() {
        got_b += 1;
    }
    assert_eq!((got_a, got_b), (2, 2));
}

#[tokio::test]
async fn memory_inequivalent_redeclare_fails() {
    // ---
    let broker = MemoryBroker::new();
    let channel = broker.connect("t").open_channel().await.unwrap();

    channel
        .declare_queue("q", QueueOptions::shared_requests())
        .await
        .unwrap();
    let err = channel
        .declare_queue(
            "q",
            QueueOptions {
                durable: true,
                ..QueueOptions::shared_requests()
            },
        )
        .await
        .unwrap_err();
    assert!(err.message().contains("different options"));
}

#[tokio::test]
async fn memory_connection_close_removes_exclusive_queues() {
    // ---
    let broker = MemoryBroker::new();
    let conn = broker.connect("owner");
    let channel = conn.open_channel().await.unwrap();

    // Exclusive but never consumed, so only the connection close removes it.
    let name = channel
        .declare_queue("", QueueOptions::private_reply())
        .await
        .unwrap();
    channel
        .declare_queue("shared", QueueOptions::shared_requests())
        .await
        .unwrap();
    assert!(broker.queue_exists(&name));

    conn.close().await.unwrap();

    assert!(!broker.queue_exists(&name));
    assert!(broker.queue_exists("shared"));
    assert!(channel
        .publish(Message::new(Address::from("shared"), Bytes::new()))
        .await
        .is_err());
}

#[tokio::test]
async fn memory_dropped_stream_stops_delivery() {
    // ---
    let broker = MemoryBroker::new();
    let channel = broker.connect("t").open_channel().await.unwrap();
    channel
        .declare_queue("work", QueueOptions::shared_requests())
        .await
        .unwrap();

    let stream = channel.consume("work", AckMode::Auto).await.unwrap();
    drop(stream);

    channel
        .publish(Message::new(Address::from("work"), Bytes::from_static(b"kept")))
        .await
        .unwrap();
    assert_eq!(broker.ready_count("work"), Some(1));
}
