//! Broker-facing abstractions: the subscription call, the stream of raw
//! deliveries it yields, and the per-delivery acknowledgement handle.

use crate::runtime::error::DeliveryError;
use anyhow::Result;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::fmt;

/// Lazy, unbounded sequence of deliveries for one subscription.
///
/// The stream ending means the subscription is gone (channel or connection dropped).
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Broker-side finalization of a single delivery.
pub trait Acknowledger: Send + Sync {
    /// Acknowledge exactly this delivery (never cumulative).
    fn ack(&self, delivery_tag: u64) -> BoxFuture<'_, Result<()>>;

    /// Return the delivery to the queue (`requeue = true`) or discard it.
    fn reject(&self, delivery_tag: u64, requeue: bool) -> BoxFuture<'_, Result<()>>;
}

/// A raw message handed out by the broker.
pub struct Delivery {
    payload: Option<Bytes>,
    delivery_tag: u64,
    redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        payload: Option<Bytes>,
        delivery_tag: u64,
        redelivered: bool,
        acker: impl Acknowledger + 'static,
    ) -> Self {
        Self {
            payload,
            delivery_tag,
            redelivered,
            acker: Box::new(acker),
        }
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// `true` when the delivery carries no body at all or a zero-length one.
    pub fn is_empty(&self) -> bool {
        self.payload.as_ref().map_or(true, Bytes::is_empty)
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Whether the broker has handed this message out before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub async fn ack(&self) -> Result<(), DeliveryError> {
        self.acker
            .ack(self.delivery_tag)
            .await
            .map_err(|source| DeliveryError::Ack {
                delivery_tag: self.delivery_tag,
                source,
            })
    }

    pub async fn reject(&self, requeue: bool) -> Result<(), DeliveryError> {
        self.acker
            .reject(self.delivery_tag, requeue)
            .await
            .map_err(|source| DeliveryError::Reject {
                delivery_tag: self.delivery_tag,
                requeue,
                source,
            })
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("payload_len", &self.payload.as_ref().map(Bytes::len))
            .finish()
    }
}

/// Subscription flags passed to [`Broker::consume`].
///
/// `Default` requests manual acknowledgement on a shared, non-exclusive subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub consumer_tag: String,
    pub auto_ack: bool,
    pub exclusive: bool,
    pub no_local: bool,
    pub no_wait: bool,
}

/// Entry point into a broker connection that can open queue subscriptions.
///
/// Connection setup, authentication and topology are owned by the implementor.
pub trait Broker: Send + Sync + 'static {
    fn consume<'a>(
        &'a self,
        queue: &'a str,
        options: &'a ConsumeOptions,
    ) -> BoxFuture<'a, Result<DeliveryStream>>;
}
