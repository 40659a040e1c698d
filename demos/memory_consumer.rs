use std::env;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use mqpool::{Consumer, ConsumerOptions, MemoryBroker, Message, Queue, Runner};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const DEFAULT_QUEUE: &str = "demo.jobs";
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_RETRY_DELAY_MS: u64 = 250;
const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 20;
const DEFAULT_FAIL_EVERY: u64 = 7;
const DEFAULT_LOG_DIRECTIVE: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    let args = ExampleArgs::from_env()?;
    let broker = MemoryBroker::new();
    broker.declare_queue(&args.queue);

    let fail_every = args.fail_every;
    let attempts = Arc::new(AtomicU64::new(0));
    let handler_attempts = attempts.clone();
    let handler = move |message: Message| {
        let attempt = handler_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        async move {
            // Simulated work proportional to the payload size.
            sleep(Duration::from_millis(message.len() as u64)).await;
            if fail_every > 0 && attempt % fail_every == 0 {
                bail!("simulated failure on attempt {attempt}");
            }
            Ok(())
        }
    };

    let consumer = Consumer::new(
        broker.clone(),
        Queue::new(args.queue.clone())?,
        handler,
        args.to_consumer_options()?,
    );
    let mut runner = Runner::new(consumer);
    let telemetry = runner.consumer().telemetry();

    let publisher = spawn_publisher(
        broker.clone(),
        args.queue.clone(),
        args.publish_interval,
        runner.cancellation_token(),
    );

    runner.run_until_ctrl_c().await?;
    publisher.abort();

    let snapshot = telemetry.snapshot();
    let stats = broker.stats(&args.queue);
    println!(
        "acked={} requeued={} skipped={} handler_failures={} handler_attempts={} left_ready={} left_unacked={}",
        snapshot.acked,
        snapshot.requeued,
        snapshot.skipped,
        snapshot.handler_failures,
        attempts.load(Ordering::Relaxed),
        stats.ready,
        stats.unacked,
    );
    Ok(())
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    mqpool::init_tracing();
}

fn spawn_publisher(
    broker: MemoryBroker,
    queue: String,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence = 0u64;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    sequence += 1;
                    if sequence % 50 == 0 {
                        broker.enqueue_empty(&queue);
                    } else {
                        broker.enqueue(&queue, format!("job-{sequence}"));
                    }
                }
            }
        }
    })
}

struct ExampleArgs {
    queue: String,
    workers: usize,
    retry_on_error: bool,
    retry_delay: Duration,
    publish_interval: Duration,
    fail_every: u64,
}

impl ExampleArgs {
    fn from_env() -> Result<Self> {
        let queue = read_env_or_default("MQPOOL_QUEUE", DEFAULT_QUEUE);
        let workers = parse_env_with_default::<usize>("MQPOOL_WORKERS", DEFAULT_WORKERS)?;
        let retry_on_error = parse_bool_env("MQPOOL_RETRY_ON_ERROR", true)?;
        let retry_delay_ms =
            parse_env_with_default::<u64>("MQPOOL_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS)?;
        let publish_interval_ms = parse_env_with_default::<u64>(
            "MQPOOL_PUBLISH_INTERVAL_MS",
            DEFAULT_PUBLISH_INTERVAL_MS,
        )?;
        let fail_every = parse_env_with_default::<u64>("MQPOOL_FAIL_EVERY", DEFAULT_FAIL_EVERY)?;

        ensure!(workers > 0, "MQPOOL_WORKERS must be greater than 0");
        ensure!(
            publish_interval_ms > 0,
            "MQPOOL_PUBLISH_INTERVAL_MS must be greater than 0"
        );

        Ok(Self {
            queue,
            workers,
            retry_on_error,
            retry_delay: Duration::from_millis(retry_delay_ms),
            publish_interval: Duration::from_millis(publish_interval_ms),
            fail_every,
        })
    }

    fn to_consumer_options(&self) -> Result<ConsumerOptions> {
        ConsumerOptions::builder()
            .workers(self.workers)
            .retry_on_error(self.retry_on_error)
            .retry_delay(self.retry_delay)
            .build()
    }
}

fn read_env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_owned(),
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(_) => Ok(default),
    }
}

fn parse_bool_env(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => bail!("failed to parse {key}='{other}' as a boolean"),
        },
        Err(_) => Ok(default),
    }
}
