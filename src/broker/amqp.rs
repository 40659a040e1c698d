//! AMQP 0-9-1 adapter over a caller-owned `lapin::Channel`.
//!
//! Opening connections, authenticating and declaring queues stay with the
//! caller; this adapter only subscribes and finalizes deliveries. Dropping a
//! delivery stream cancels its consumer on the broker and requeues whatever
//! lapin had already buffered for it.

use crate::broker::delivery::{Acknowledger, ConsumeOptions, Delivery, DeliveryStream};
use crate::broker::Broker;
use anyhow::{Context, Result};
use bytes::Bytes;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context as TaskContext, Poll};
use futures::future::{self, BoxFuture};
use futures::{FutureExt, Stream, StreamExt};
use lapin::acker::Acker;
use lapin::options::{BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicRejectOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use tokio::runtime::Handle;

#[derive(Clone)]
pub struct AmqpBroker {
    channel: Channel,
}

impl AmqpBroker {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

impl Broker for AmqpBroker {
    fn consume<'a>(
        &'a self,
        queue: &'a str,
        options: &'a ConsumeOptions,
    ) -> BoxFuture<'a, Result<DeliveryStream>> {
        Box::pin(async move {
            let consumer = self
                .channel
                .basic_consume(
                    queue,
                    &options.consumer_tag,
                    BasicConsumeOptions {
                        no_local: options.no_local,
                        no_ack: options.auto_ack,
                        exclusive: options.exclusive,
                        nowait: options.no_wait,
                    },
                    FieldTable::default(),
                )
                .await
                .with_context(|| format!("basic.consume on queue {queue}"))?;
            let consumer_tag = consumer.tag().as_str().to_owned();
            tracing::debug!(queue, consumer_tag = %consumer_tag, "amqp consumer registered");

            let queue_name = queue.to_owned();
            let deliveries = consumer
                .take_while(move |item| {
                    if let Err(err) = item {
                        tracing::warn!(queue = %queue_name, error = %err, "amqp consumer stream failed");
                    }
                    future::ready(item.is_ok())
                })
                .filter_map(|item| future::ready(item.ok().map(into_delivery)));

            Ok(CancelOnDrop {
                deliveries: Some(deliveries.boxed()),
                channel: self.channel.clone(),
                queue: queue.to_owned(),
                consumer_tag,
            }
            .boxed())
        })
    }
}

/// Delivery stream that ends its broker-side consumer when dropped.
struct CancelOnDrop {
    deliveries: Option<DeliveryStream>,
    channel: Channel,
    queue: String,
    consumer_tag: String,
}

impl Stream for CancelOnDrop {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Delivery>> {
        match self.deliveries.as_mut() {
            Some(deliveries) => deliveries.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let Some(deliveries) = self.deliveries.take() else {
            return;
        };
        let queue = std::mem::take(&mut self.queue);
        let consumer_tag = std::mem::take(&mut self.consumer_tag);

        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(
                queue = %queue,
                consumer_tag = %consumer_tag,
                "no runtime to cancel amqp consumer; it stays registered until the channel closes"
            );
            return;
        };

        let channel = self.channel.clone();
        runtime.spawn(async move {
            let cancel = {
                let consumer_tag = consumer_tag.clone();
                async move {
                    channel
                        .basic_cancel(&consumer_tag, BasicCancelOptions::default())
                        .await
                        .context("basic.cancel")
                }
            };
            release_subscription(cancel, deliveries, &queue, &consumer_tag).await;
        });
    }
}

/// Runs `cancel`, then requeues every delivery the subscription had already
/// received but nobody claimed. Returns how many were requeued.
async fn release_subscription(
    cancel: impl Future<Output = Result<()>>,
    mut deliveries: DeliveryStream,
    queue: &str,
    consumer_tag: &str,
) -> usize {
    if let Err(err) = cancel.await {
        tracing::warn!(queue, consumer_tag, error = %err, "failed to cancel consumer");
    }

    let mut buffered = Vec::new();
    while let Some(Some(delivery)) = deliveries.next().now_or_never() {
        buffered.push(delivery);
    }
    drop(deliveries);

    let mut requeued = 0;
    for delivery in buffered {
        match delivery.reject(true).await {
            Ok(()) => requeued += 1,
            Err(err) => tracing::warn!(queue, error = %err, "failed to requeue buffered delivery"),
        }
    }

    tracing::debug!(queue, consumer_tag, requeued, "consumer released");
    requeued
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let payload = Some(Bytes::from(delivery.data));
    Delivery::new(
        payload,
        delivery.delivery_tag,
        delivery.redelivered,
        AmqpAcker {
            acker: delivery.acker,
        },
    )
}

struct AmqpAcker {
    acker: Acker,
}

impl Acknowledger for AmqpAcker {
    fn ack(&self, _delivery_tag: u64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.acker
                .ack(BasicAckOptions { multiple: false })
                .await
                .map(|_| ())
                .context("basic.ack")
        })
    }

    fn reject(&self, _delivery_tag: u64, requeue: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.acker
                .reject(BasicRejectOptions { requeue })
                .await
                .map(|_| ())
                .context("basic.reject")
        })
    }
}
