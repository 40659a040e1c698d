use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use mqpool::{Consumer, ConsumerOptions, MemoryBroker, MessageHandler, Queue, Telemetry};
use once_cell::sync::Lazy;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

pub const QUEUE: &str = "jobs";
pub const WAIT: Duration = Duration::from_secs(5);

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn memory_broker() -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker.declare_queue(QUEUE);
    broker
}

pub fn consumer<H: MessageHandler>(
    broker: &MemoryBroker,
    handler: H,
    options: ConsumerOptions,
) -> Result<Consumer<H>> {
    Ok(Consumer::new(
        broker.clone(),
        Queue::new(QUEUE)?,
        handler,
        options,
    ))
}

pub async fn wait_until<F: FnMut() -> bool>(
    what: &str,
    timeout: Duration,
    mut check: F,
) -> Result<()> {
    let start = Instant::now();
    loop {
        if check() {
            return Ok(());
        }

        if start.elapsed() > timeout {
            bail!("{what} not observed within {:?}", timeout);
        }

        sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_acked(
    telemetry: &Arc<Telemetry>,
    target: u64,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let current = telemetry.acked();
        if current >= target {
            return Ok(());
        }

        if start.elapsed() > timeout {
            bail!(
                "consumer did not ack {target} deliveries within {:?} (acked: {current}, requeued: {})",
                timeout,
                telemetry.requeued()
            );
        }

        sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_running_workers(
    telemetry: &Arc<Telemetry>,
    expected: usize,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let current = telemetry.running_workers();
        if current == expected {
            return Ok(());
        }

        if start.elapsed() > timeout {
            bail!(
                "running workers did not reach {expected} within {:?} (running: {current}, generations: {})",
                timeout,
                telemetry.generations()
            );
        }

        sleep(Duration::from_millis(5)).await;
    }
}
