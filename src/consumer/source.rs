use crate::broker::{Broker, ConsumeOptions, Delivery, DeliveryStream};
use crate::consumer::queue::Queue;
use crate::runtime::error::ConsumerError;
use futures::stream::Fuse;
use futures::StreamExt;
use tokio::sync::Mutex;

/// One live subscription shared by every worker of a generation.
///
/// Each delivery is handed to exactly one caller of [`DeliverySource::next`].
/// Dropping the last reference drops the subscription.
pub struct DeliverySource {
    queue: Queue,
    stream: Mutex<Fuse<DeliveryStream>>,
}

impl DeliverySource {
    /// Subscribes to `queue` with manual acknowledgement on a shared, non-exclusive consumer.
    pub async fn open(broker: &dyn Broker, queue: &Queue) -> Result<Self, ConsumerError> {
        let options = ConsumeOptions::default();
        let stream = broker
            .consume(queue.name(), &options)
            .await
            .map_err(|err| ConsumerError::connection_failure(queue.name(), err))?;

        Ok(Self {
            queue: queue.clone(),
            stream: Mutex::new(stream.fuse()),
        })
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Waits for the next delivery. `None` means the subscription has ended, and
    /// every later call returns `None` as well.
    ///
    /// Cancel-safe: dropping the future before it resolves loses no delivery.
    pub async fn next(&self) -> Option<Delivery> {
        let mut stream = self.stream.lock().await;
        stream.next().await
    }
}
