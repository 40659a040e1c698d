use crate::broker::Broker;
use crate::consumer::handler::MessageHandler;
use crate::consumer::policy::RetryPolicy;
use crate::consumer::queue::Queue;
use crate::consumer::source::DeliverySource;
use crate::consumer::worker_pool::{GenerationParams, WorkerGeneration};
use crate::runtime::config::ConsumerOptions;
use crate::runtime::error::ConsumerError;
use crate::runtime::telemetry::Telemetry;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Reconnecting,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConsumerState::Stopped => "stopped",
            ConsumerState::Starting => "starting",
            ConsumerState::Running => "running",
            ConsumerState::Stopping => "stopping",
            ConsumerState::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

/// Binds one queue, one handler and one set of options to a pool of workers.
///
/// Every method that changes the subscription takes `&mut self`, so two
/// `start`/`reconnect` calls can never race on the same consumer.
pub struct Consumer<H: MessageHandler> {
    broker: Arc<dyn Broker>,
    queue: Queue,
    handler: Arc<H>,
    options: ConsumerOptions,
    telemetry: Arc<Telemetry>,
    source: Option<Arc<DeliverySource>>,
    generations: Vec<WorkerGeneration>,
    next_generation: u64,
    state: ConsumerState,
}

impl<H: MessageHandler> Consumer<H> {
    pub fn new<B: Broker>(broker: B, queue: Queue, handler: H, options: ConsumerOptions) -> Self {
        Self::with_shared_broker(Arc::new(broker), queue, handler, options)
    }

    /// Same as [`Consumer::new`] for a broker handle that is already shared.
    pub fn with_shared_broker(
        broker: Arc<dyn Broker>,
        queue: Queue,
        handler: H,
        options: ConsumerOptions,
    ) -> Self {
        Self {
            broker,
            queue,
            handler: Arc::new(handler),
            options,
            telemetry: Arc::new(Telemetry::default()),
            source: None,
            generations: Vec::new(),
            next_generation: 0,
            state: ConsumerState::Stopped,
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// A consumer whose workers have all exited on their own (caller token
    /// cancelled, subscription lost) reports `Stopped`.
    pub fn state(&self) -> ConsumerState {
        match self.state {
            ConsumerState::Running if self.generations.iter().all(WorkerGeneration::is_finished) => {
                ConsumerState::Stopped
            }
            state => state,
        }
    }

    /// True while the consumer holds a delivery source that workers still read.
    pub fn is_subscribed(&self) -> bool {
        self.source.is_some() && self.state() != ConsumerState::Stopped
    }

    /// Opens the delivery source and launches `workers` loops over it.
    ///
    /// Returns as soon as the workers are spawned. Workers stop when `shutdown`
    /// is cancelled or when this generation is retired by `reconnect`/`stop`.
    pub async fn start(&mut self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        self.retire_finished_generations().await;
        let already_running = !self.generations.is_empty();
        if already_running {
            tracing::warn!(
                queue = %self.queue,
                live_generations = self.generations.len(),
                "consumer already running; launching an additional worker generation"
            );
        }

        self.state = ConsumerState::Starting;
        let source = match DeliverySource::open(self.broker.as_ref(), &self.queue).await {
            Ok(source) => Arc::new(source),
            Err(err) => {
                tracing::error!(queue = %self.queue, error = %err, "failed to start consumer");
                self.state = if already_running {
                    ConsumerState::Running
                } else {
                    ConsumerState::Stopped
                };
                return Err(err);
            }
        };

        self.next_generation += 1;
        let generation = WorkerGeneration::launch(GenerationParams {
            id: self.next_generation,
            workers: self.options.workers(),
            source: source.clone(),
            handler: self.handler.clone(),
            policy: RetryPolicy::from_options(&self.options),
            shutdown,
            telemetry: self.telemetry.clone(),
            metrics_interval: Some(self.options.metrics_interval()),
        });
        self.generations.push(generation);
        self.source = Some(source);
        self.state = ConsumerState::Running;

        tracing::info!(
            generation = self.next_generation,
            "started {} consumer workers for queue {}",
            self.options.workers(),
            self.queue
        );
        Ok(())
    }

    /// Retires every live generation and starts a fresh one.
    ///
    /// Old workers have exited before the new source is opened. If opening
    /// fails the consumer is left stopped with no source.
    pub async fn reconnect(&mut self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        tracing::info!(queue = %self.queue, "reconnecting consumer");
        self.state = ConsumerState::Reconnecting;
        self.source = None;
        self.retire_generations().await;
        self.start(shutdown).await
    }

    /// Force-stops every live generation and waits for its workers to exit.
    pub async fn stop(&mut self) {
        if self.generations.is_empty() && self.source.is_none() {
            self.state = ConsumerState::Stopped;
            return;
        }

        self.state = ConsumerState::Stopping;
        self.source = None;
        self.retire_generations().await;
        self.state = ConsumerState::Stopped;
        tracing::info!(queue = %self.queue, "consumer stopped");
    }

    async fn retire_finished_generations(&mut self) {
        let (finished, live): (Vec<_>, Vec<_>) = self
            .generations
            .drain(..)
            .partition(WorkerGeneration::is_finished);
        self.generations = live;

        for generation in finished {
            generation.force_stop();
            let id = generation.id();
            let exits = generation.join().await;
            tracing::debug!(generation = id, ?exits, "finished worker generation retired");
        }
    }

    async fn retire_generations(&mut self) {
        for generation in &self.generations {
            generation.force_stop();
        }

        for generation in self.generations.drain(..) {
            let id = generation.id();
            let exits = generation.join().await;
            tracing::debug!(generation = id, workers = exits.len(), "worker generation retired");
        }
    }
}

impl<H: MessageHandler> Drop for Consumer<H> {
    fn drop(&mut self) {
        for generation in &self.generations {
            generation.force_stop();
        }
    }
}
