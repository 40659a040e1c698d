//! Broker seam: subscription call, delivery stream, per-delivery
//! acknowledgement, plus the in-process and AMQP adapters.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod delivery;
pub mod memory;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use delivery::{Acknowledger, Broker, ConsumeOptions, Delivery, DeliveryStream};
pub use memory::{MemoryBroker, QueueStats};
