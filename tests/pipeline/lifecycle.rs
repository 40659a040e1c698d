use std::time::Duration;

use crate::support::{
    handlers::{GatedHandler, RecordingHandler},
    helpers::{
        consumer, init_tracing, memory_broker, wait_for_acked, wait_for_running_workers,
        wait_until, QUEUE, WAIT,
    },
};
use anyhow::Result;
use mqpool::{ConsumerOptions, ConsumerState, MemoryBroker};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_failure_launches_no_workers() -> Result<()> {
    init_tracing();
    let broker = MemoryBroker::new();
    broker.enqueue(QUEUE, "pending");
    broker.fail_next_consume(QUEUE, "connection refused");

    let options = ConsumerOptions::builder().workers(4).build()?;
    let mut consumer = consumer(&broker, RecordingHandler::default(), options)?;
    let err = consumer
        .start(CancellationToken::new())
        .await
        .expect_err("open failure must surface from start");
    assert!(err.is_connection_failure());
    assert_eq!(err.queue(), QUEUE);
    assert!(err.to_string().contains("connection refused"));

    let telemetry = consumer.telemetry();
    assert_eq!(telemetry.running_workers(), 0);
    assert_eq!(telemetry.generations(), 0);
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    let stats = broker.stats(QUEUE);
    assert_eq!(stats.consumers, 0);
    assert_eq!(stats.ready, 1);

    consumer.start(CancellationToken::new()).await?;
    wait_for_acked(&telemetry, 1, WAIT).await?;
    consumer.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconnect_waits_for_previous_generation() -> Result<()> {
    init_tracing();
    let broker = memory_broker();
    broker.enqueue(QUEUE, "in-flight");

    let handler = GatedHandler::new();
    let options = ConsumerOptions::builder().workers(1).build()?;
    let mut consumer = consumer(&broker, handler.clone(), options)?;
    consumer.start(CancellationToken::new()).await?;
    let telemetry = consumer.telemetry();
    wait_until("handler entered", WAIT, || handler.started() == 1).await?;

    let reconnecting = tokio::spawn(async move {
        let result = consumer.reconnect(CancellationToken::new()).await;
        (consumer, result)
    });

    sleep(Duration::from_millis(50)).await;
    assert!(!reconnecting.is_finished(), "reconnect must wait for the in-flight handler");
    assert_eq!(telemetry.generations(), 1);
    assert_eq!(broker.stats(QUEUE).consumers, 1);

    handler.release(1);
    let (mut consumer, result) = reconnecting.await?;
    result?;

    assert_eq!(telemetry.acked(), 1, "in-flight message completes before the worker exits");
    assert_eq!(telemetry.generations(), 2);
    assert_eq!(telemetry.running_workers(), 1);
    assert_eq!(broker.stats(QUEUE).consumers, 1);
    assert_eq!(consumer.state(), ConsumerState::Running);

    handler.release(1);
    broker.enqueue(QUEUE, "next");
    wait_for_acked(&telemetry, 2, WAIT).await?;

    consumer.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_reconnect_leaves_consumer_stopped() -> Result<()> {
    init_tracing();
    let broker = memory_broker();
    let options = ConsumerOptions::builder().workers(2).build()?;
    let mut consumer = consumer(&broker, RecordingHandler::default(), options)?;
    consumer.start(CancellationToken::new()).await?;

    broker.fail_next_consume(QUEUE, "channel closed");
    let err = consumer
        .reconnect(CancellationToken::new())
        .await
        .expect_err("reconnect must surface the open failure");
    assert!(err.is_connection_failure());

    assert_eq!(consumer.state(), ConsumerState::Stopped);
    assert!(!consumer.is_subscribed());
    assert_eq!(consumer.telemetry().running_workers(), 0);
    assert_eq!(broker.stats(QUEUE).consumers, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_waits_for_in_flight_handler() -> Result<()> {
    init_tracing();
    let broker = memory_broker();
    broker.enqueue(QUEUE, "in-flight");
    broker.enqueue(QUEUE, "unclaimed");

    let handler = GatedHandler::new();
    let options = ConsumerOptions::builder().workers(1).build()?;
    let mut consumer = consumer(&broker, handler.clone(), options)?;
    let shutdown = CancellationToken::new();
    consumer.start(shutdown.clone()).await?;
    let telemetry = consumer.telemetry();
    wait_until("handler entered", WAIT, || handler.started() == 1).await?;

    shutdown.cancel();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(telemetry.running_workers(), 1, "handler is never interrupted");

    handler.release(1);
    wait_for_running_workers(&telemetry, 0, WAIT).await?;
    assert_eq!(telemetry.acked(), 1);
    assert_eq!(handler.started(), 1, "unclaimed message is left for the next consumer");
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    assert_eq!(broker.stats(QUEUE).ready, 1);

    consumer.stop().await;
    assert_eq!(broker.stats(QUEUE).consumers, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lost_subscription_recovers_through_reconnect() -> Result<()> {
    init_tracing();
    let broker = memory_broker();
    let handler = RecordingHandler::default();
    let options = ConsumerOptions::builder().workers(2).build()?;
    let mut consumer = consumer(&broker, handler.clone(), options)?;
    consumer.start(CancellationToken::new()).await?;
    let telemetry = consumer.telemetry();

    broker.close(QUEUE);
    wait_for_running_workers(&telemetry, 0, WAIT).await?;
    assert_eq!(consumer.state(), ConsumerState::Stopped);

    broker.enqueue(QUEUE, "while disconnected");
    consumer.reconnect(CancellationToken::new()).await?;
    wait_for_acked(&telemetry, 1, WAIT).await?;
    assert_eq!(handler.seen().len(), 1);
    assert_eq!(broker.stats(QUEUE).consumers, 1);

    consumer.stop().await;
    Ok(())
}
