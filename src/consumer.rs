//! The consumption engine: shared delivery source, worker loops, the
//! retry/ack decision and the lifecycle controller that ties them together.

pub mod dispatch;
pub mod handler;
pub mod lifecycle;
pub mod policy;
pub mod queue;
pub mod source;
pub(crate) mod worker_pool;

pub use dispatch::WorkerExit;
pub use handler::{HandlerFuture, Message, MessageHandler};
pub use lifecycle::{Consumer, ConsumerState};
pub use policy::{Disposition, RetryPolicy};
pub use queue::Queue;
pub use source::DeliverySource;
