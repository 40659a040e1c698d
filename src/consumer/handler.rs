use anyhow::Result;
use bytes::Bytes;
use core::future::Future;
use core::pin::Pin;
use std::ops::Deref;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Non-empty payload handed to a [`MessageHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
}

impl Message {
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_bytes(self) -> Bytes {
        self.payload
    }
}

impl Deref for Message {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.payload
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.payload
    }
}

/// User code invoked once per delivered message.
///
/// Up to `workers` calls run at the same time, so implementations must be safe to
/// share across tasks. Returning `Err` hands the message to the retry/ack policy.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: Message) -> HandlerFuture<'_>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, message: Message) -> HandlerFuture<'_> {
        Box::pin(self(message))
    }
}
