//! A single worker loop: pull a delivery, run the handler, finalize the delivery.

use crate::broker::Delivery;
use crate::consumer::handler::{Message, MessageHandler};
use crate::consumer::policy::{Disposition, RetryPolicy};
use crate::consumer::source::DeliverySource;
use crate::runtime::telemetry::Telemetry;
use anyhow::{anyhow, Result};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Why a worker loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The caller's cancellation token fired.
    Cancelled,
    /// The generation's force-stop token fired.
    ForceStopped,
    /// The subscription ended underneath the worker.
    SourceClosed,
}

pub(crate) struct Worker<H: MessageHandler> {
    pub(crate) id: usize,
    pub(crate) generation: u64,
    pub(crate) source: Arc<DeliverySource>,
    pub(crate) handler: Arc<H>,
    pub(crate) policy: RetryPolicy,
    pub(crate) shutdown: CancellationToken,
    pub(crate) force_stop: CancellationToken,
    pub(crate) telemetry: Arc<Telemetry>,
}

impl<H: MessageHandler> Worker<H> {
    #[tracing::instrument(
        name = "worker",
        skip_all,
        fields(queue = %self.source.queue(), worker = self.id, generation = self.generation)
    )]
    pub(crate) async fn run(self) -> WorkerExit {
        tracing::debug!("worker task started");

        loop {
            // Stop signals are only observed here, never while a handler is running.
            // Once one has fired no further delivery is claimed.
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::info!("finished consuming queue");
                    return WorkerExit::Cancelled;
                }
                _ = self.force_stop.cancelled() => {
                    tracing::info!("force stopped consuming queue");
                    return WorkerExit::ForceStopped;
                }
                next = self.source.next() => next,
            };

            let Some(delivery) = next else {
                tracing::warn!("delivery source closed; worker exiting");
                return WorkerExit::SourceClosed;
            };

            self.dispatch(delivery).await;
        }
    }

    async fn dispatch(&self, delivery: Delivery) {
        let delivery_tag = delivery.delivery_tag();
        if delivery.is_empty() {
            tracing::debug!(delivery_tag, "skipping empty delivery");
            self.telemetry.record_skip();
            return;
        }

        let payload = delivery.payload().cloned().unwrap_or_default();
        let outcome = self.invoke(Message::new(payload)).await;
        if let Err(err) = &outcome {
            tracing::error!(
                delivery_tag,
                redelivered = delivery.redelivered(),
                error = %err,
                "message handler failed"
            );
        }

        match self.policy.decide(outcome.is_ok()) {
            Disposition::Ack => self.ack(&delivery).await,
            Disposition::Requeue { delay } => {
                self.pause(delay).await;
                self.requeue(&delivery).await;
            }
        }
    }

    async fn invoke(&self, message: Message) -> Result<()> {
        let _in_flight = self.telemetry.enter_handler();
        let handler = &self.handler;
        let result = AssertUnwindSafe(async move { handler.handle(message).await })
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.telemetry.record_handler_failure();
                Err(err)
            }
            Err(panic_payload) => {
                self.telemetry.record_handler_panic();
                Err(anyhow!(
                    "handler panicked: {}",
                    panic_message(panic_payload.as_ref())
                ))
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        match delivery.ack().await {
            Ok(()) => {
                self.telemetry.record_ack();
                tracing::trace!(delivery_tag = delivery.delivery_tag(), "delivery acknowledged");
            }
            Err(err) => {
                self.telemetry.record_ack_failure();
                tracing::error!(error = %err, "failed to acknowledge delivery");
            }
        }
    }

    async fn requeue(&self, delivery: &Delivery) {
        match delivery.reject(true).await {
            Ok(()) => {
                self.telemetry.record_requeue();
                tracing::debug!(delivery_tag = delivery.delivery_tag(), "delivery requeued");
            }
            Err(err) => {
                self.telemetry.record_reject_failure();
                tracing::error!(error = %err, "failed to requeue delivery");
            }
        }
    }

    /// Holds only this worker for `delay`; a stop signal cuts the wait short.
    async fn pause(&self, delay: Duration) {
        if delay.is_zero() {
            yield_now().await;
            return;
        }

        tokio::select! {
            _ = sleep(delay) => {}
            _ = self.shutdown.cancelled() => {
                tracing::debug!("shutdown during retry delay; requeueing immediately");
            }
            _ = self.force_stop.cancelled() => {
                tracing::debug!("force stop during retry delay; requeueing immediately");
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
