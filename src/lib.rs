pub mod broker;
pub mod consumer;
pub mod runtime;

#[cfg(feature = "amqp")]
pub use broker::AmqpBroker;
pub use broker::{
    Acknowledger, Broker, ConsumeOptions, Delivery, DeliveryStream, MemoryBroker, QueueStats,
};
pub use consumer::{
    Consumer, ConsumerState, DeliverySource, Disposition, HandlerFuture, Message,
    MessageHandler, Queue, RetryPolicy, WorkerExit,
};
pub use runtime::config::{ConsumerOptions, ConsumerOptionsBuilder, ConsumerOptionsParams};
pub use runtime::error::{ConsumerError, DeliveryError};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
