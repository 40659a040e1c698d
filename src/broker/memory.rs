//! In-process broker with at-least-once semantics.
//!
//! Each queue keeps a ready list and an unacked set keyed by delivery tag.
//! Rejecting with requeue puts the body back at the head of the ready list;
//! closing a queue ends every live subscription and returns its unacked
//! messages to the queue, the same way a dropped broker channel would.

use crate::broker::delivery::{Acknowledger, ConsumeOptions, Delivery, DeliveryStream};
use crate::broker::Broker;
use anyhow::{anyhow, bail, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Point-in-time view of one memory queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub unacked: usize,
    pub acked: u64,
    pub requeued: u64,
    pub discarded: u64,
    pub consumers: usize,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    queues: Arc<Mutex<HashMap<String, Arc<MemoryQueue>>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the queue if it does not exist yet.
    pub fn declare_queue(&self, name: &str) {
        self.queue_or_declare(name);
    }

    /// Appends a message to the tail of the queue, declaring it if needed.
    pub fn enqueue(&self, name: &str, payload: impl Into<Bytes>) {
        self.queue_or_declare(name).push_back(Some(payload.into()));
    }

    /// Appends a delivery that carries no body.
    pub fn enqueue_empty(&self, name: &str) {
        self.queue_or_declare(name).push_back(None);
    }

    /// Ends every live subscription on the queue and requeues their unacked messages.
    pub fn close(&self, name: &str) {
        if let Some(queue) = self.lookup(name) {
            queue.close();
        }
    }

    /// Makes the next `consume` call on `name` fail with `message`.
    pub fn fail_next_consume(&self, name: &str, message: impl Into<String>) {
        self.queue_or_declare(name).lock().fail_next_consume = Some(message.into());
    }

    /// While enabled, every ack and reject on `name` is refused and the delivery stays unacked.
    pub fn fail_acknowledgements(&self, name: &str, enabled: bool) {
        self.queue_or_declare(name).lock().fail_acknowledgements = enabled;
    }

    pub fn stats(&self, name: &str) -> QueueStats {
        self.lookup(name)
            .map(|queue| queue.stats())
            .unwrap_or_default()
    }

    fn lookup(&self, name: &str) -> Option<Arc<MemoryQueue>> {
        self.queues
            .lock()
            .expect("memory broker mutex poisoned")
            .get(name)
            .cloned()
    }

    fn queue_or_declare(&self, name: &str) -> Arc<MemoryQueue> {
        let mut queues = self.queues.lock().expect("memory broker mutex poisoned");
        queues
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(MemoryQueue::new(name)))
            .clone()
    }
}

impl Broker for MemoryBroker {
    fn consume<'a>(
        &'a self,
        queue: &'a str,
        options: &'a ConsumeOptions,
    ) -> BoxFuture<'a, Result<DeliveryStream>> {
        Box::pin(async move {
            let Some(memory_queue) = self.lookup(queue) else {
                bail!("NOT_FOUND - no queue '{queue}'");
            };
            if options.auto_ack {
                bail!("memory broker only supports manual acknowledgement");
            }

            let subscription = memory_queue.subscribe()?;
            tracing::debug!(queue, epoch = subscription.epoch, "memory subscription opened");

            let stream = futures::stream::unfold(subscription, |subscription| async move {
                let delivery = subscription.queue.next_delivery(subscription.epoch).await?;
                Some((delivery, subscription))
            });
            Ok(stream.boxed())
        })
    }
}

struct ReadyMessage {
    body: Option<Bytes>,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<ReadyMessage>,
    unacked: HashMap<u64, Option<Bytes>>,
    next_tag: u64,
    epoch: u64,
    acked: u64,
    requeued: u64,
    discarded: u64,
    consumers: usize,
    fail_next_consume: Option<String>,
    fail_acknowledgements: bool,
}

struct MemoryQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryQueue {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("memory queue mutex poisoned")
    }

    fn push_back(&self, body: Option<Bytes>) {
        self.lock().ready.push_back(ReadyMessage {
            body,
            redelivered: false,
        });
        self.notify.notify_waiters();
    }

    fn subscribe(self: &Arc<Self>) -> Result<Subscription> {
        let mut state = self.lock();
        if let Some(message) = state.fail_next_consume.take() {
            return Err(anyhow!(message));
        }
        state.consumers += 1;
        Ok(Subscription {
            queue: Arc::clone(self),
            epoch: state.epoch,
        })
    }

    fn close(&self) {
        {
            let mut state = self.lock();
            state.epoch += 1;
            let mut tags: Vec<u64> = state.unacked.keys().copied().collect();
            tags.sort_unstable();
            for tag in tags.into_iter().rev() {
                if let Some(body) = state.unacked.remove(&tag) {
                    state.ready.push_front(ReadyMessage {
                        body,
                        redelivered: true,
                    });
                }
            }
        }
        tracing::debug!(queue = %self.name, "memory queue closed its subscriptions");
        self.notify.notify_waiters();
    }

    async fn next_delivery(self: &Arc<Self>, epoch: u64) -> Option<Delivery> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if state.epoch != epoch {
                    return None;
                }
                if let Some(message) = state.ready.pop_front() {
                    state.next_tag += 1;
                    let tag = state.next_tag;
                    state.unacked.insert(tag, message.body.clone());
                    return Some(Delivery::new(
                        message.body,
                        tag,
                        message.redelivered,
                        MemoryAcker {
                            queue: Arc::clone(self),
                        },
                    ));
                }
            }
            notified.await;
        }
    }

    fn ack(&self, delivery_tag: u64) -> Result<()> {
        let mut state = self.lock();
        if state.fail_acknowledgements {
            bail!("ack refused for delivery {delivery_tag}");
        }
        if state.unacked.remove(&delivery_tag).is_none() {
            bail!("PRECONDITION_FAILED - unknown delivery tag {delivery_tag}");
        }
        state.acked += 1;
        Ok(())
    }

    fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        {
            let mut state = self.lock();
            if state.fail_acknowledgements {
                bail!("reject refused for delivery {delivery_tag}");
            }
            let Some(body) = state.unacked.remove(&delivery_tag) else {
                bail!("PRECONDITION_FAILED - unknown delivery tag {delivery_tag}");
            };
            if !requeue {
                state.discarded += 1;
                return Ok(());
            }
            state.requeued += 1;
            state.ready.push_front(ReadyMessage {
                body,
                redelivered: true,
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            ready: state.ready.len(),
            unacked: state.unacked.len(),
            acked: state.acked,
            requeued: state.requeued,
            discarded: state.discarded,
            consumers: state.consumers,
        }
    }
}

struct Subscription {
    queue: Arc<MemoryQueue>,
    epoch: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut state = self.queue.lock();
        state.consumers = state.consumers.saturating_sub(1);
    }
}

struct MemoryAcker {
    queue: Arc<MemoryQueue>,
}

impl Acknowledger for MemoryAcker {
    fn ack(&self, delivery_tag: u64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.queue.ack(delivery_tag) })
    }

    fn reject(&self, delivery_tag: u64, requeue: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.queue.reject(delivery_tag, requeue) })
    }
}
