//! Worker generations.
//!
//! Every `start` launches one generation: a fixed set of worker tasks sharing a
//! single delivery source, a force-stop token owned by that generation alone, and
//! an optional metrics reporter. The last worker to exit cancels the force-stop
//! token, so the reporter never outlives the workers.

use crate::consumer::dispatch::{Worker, WorkerExit};
use crate::consumer::handler::MessageHandler;
use crate::consumer::policy::RetryPolicy;
use crate::consumer::source::DeliverySource;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct GenerationParams<H: MessageHandler> {
    pub id: u64,
    pub workers: usize,
    pub source: Arc<DeliverySource>,
    pub handler: Arc<H>,
    pub policy: RetryPolicy,
    pub shutdown: CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub metrics_interval: Option<Duration>,
}

pub(crate) struct WorkerGeneration {
    id: u64,
    force_stop: CancellationToken,
    workers: Vec<JoinHandle<WorkerExit>>,
    metrics: Option<JoinHandle<()>>,
}

impl WorkerGeneration {
    pub(crate) fn launch<H: MessageHandler>(params: GenerationParams<H>) -> Self {
        let force_stop = CancellationToken::new();
        let worker_count = params.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        let remaining_workers = Arc::new(AtomicUsize::new(worker_count));

        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                generation: params.id,
                source: params.source.clone(),
                handler: params.handler.clone(),
                policy: params.policy,
                shutdown: params.shutdown.clone(),
                force_stop: force_stop.clone(),
                telemetry: params.telemetry.clone(),
            };
            let running = params.telemetry.enter_worker();
            let remaining_workers = remaining_workers.clone();
            let generation_done = force_stop.clone();
            workers.push(tokio::spawn(async move {
                let _running = running;
                let exit = worker.run().await;
                if remaining_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
                    generation_done.cancel();
                }
                exit
            }));
        }

        let metrics = params.metrics_interval.map(|interval| {
            spawn_metrics_reporter(
                params.telemetry.clone(),
                params.source.queue().shared_name(),
                params.shutdown.clone(),
                force_stop.clone(),
                interval,
            )
        });

        params.telemetry.record_generation_started();

        Self {
            id: params.id,
            force_stop,
            workers,
            metrics,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Tells every worker of this generation to exit at its next wait point.
    pub(crate) fn force_stop(&self) {
        self.force_stop.cancel();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.workers.iter().all(JoinHandle::is_finished)
    }

    #[cfg(test)]
    fn reporter_finished(&self) -> bool {
        self.metrics.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for every worker and the reporter to return.
    pub(crate) async fn join(self) -> Vec<WorkerExit> {
        let mut exits = Vec::with_capacity(self.workers.len());
        for (worker_id, handle) in self.workers.into_iter().enumerate() {
            match handle.await {
                Ok(exit) => exits.push(exit),
                Err(err) => tracing::error!(
                    generation = self.id,
                    worker = worker_id,
                    error = %err,
                    "worker task failed to join"
                ),
            }
        }

        if let Some(metrics) = self.metrics {
            if let Err(err) = metrics.await {
                tracing::warn!(generation = self.id, error = %err, "metrics reporter failed to join");
            }
        }

        exits
    }
}
