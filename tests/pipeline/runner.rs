use std::time::Duration;

use crate::support::{
    handlers::RecordingHandler,
    helpers::{consumer, init_tracing, memory_broker, wait_for_acked, QUEUE, WAIT},
};
use anyhow::Result;
use mqpool::{ConsumerOptions, ConsumerState, Runner};
use tokio::time::{sleep, timeout};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_can_be_restarted() -> Result<()> {
    init_tracing();
    let broker = memory_broker();
    let options = ConsumerOptions::builder().workers(2).build()?;
    let mut runner = Runner::new(consumer(&broker, RecordingHandler::default(), options)?);
    let telemetry = runner.consumer().telemetry();

    runner.start().await?;
    broker.enqueue(QUEUE, "first");
    wait_for_acked(&telemetry, 1, WAIT).await?;

    let first_token = runner.cancellation_token();
    runner.stop().await?;
    assert!(first_token.is_cancelled());
    assert_eq!(runner.consumer().state(), ConsumerState::Stopped);
    assert_eq!(broker.stats(QUEUE).consumers, 0);

    runner.start().await?;
    broker.enqueue(QUEUE, "second");
    wait_for_acked(&telemetry, 2, WAIT).await?;
    assert_eq!(telemetry.generations(), 2);

    runner.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_reconnect_keeps_processing() -> Result<()> {
    init_tracing();
    let broker = memory_broker();
    let options = ConsumerOptions::builder().workers(3).build()?;
    let mut runner = Runner::new(consumer(&broker, RecordingHandler::default(), options)?);
    let telemetry = runner.consumer().telemetry();

    runner.start().await?;
    runner.reconnect().await?;
    assert!(runner.is_started());
    assert_eq!(telemetry.running_workers(), 3);
    assert_eq!(broker.stats(QUEUE).consumers, 1);

    broker.enqueue(QUEUE, "after reconnect");
    wait_for_acked(&telemetry, 1, WAIT).await?;
    runner.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_until_ctrl_c_exits_when_token_is_cancelled() -> Result<()> {
    init_tracing();
    let broker = memory_broker();
    let options = ConsumerOptions::builder().workers(1).build()?;
    let mut runner = Runner::new(consumer(&broker, RecordingHandler::default(), options)?);
    let token = runner.cancellation_token();

    let trigger = tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    timeout(WAIT, runner.run_until_ctrl_c()).await??;
    trigger.await?;
    assert!(!runner.is_started());
    assert_eq!(runner.consumer().telemetry().running_workers(), 0);
    Ok(())
}
