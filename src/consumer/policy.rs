//! Retry/ack decision for a single handled message.
//!
//! | handler result | retry_on_error | disposition                     |
//! |----------------|----------------|---------------------------------|
//! | success        | any            | ack                             |
//! | failure        | false          | ack (failure is terminal)       |
//! | failure        | true           | wait `retry_delay`, then requeue |
//!
//! There is no attempt cap: a message that always fails under
//! `retry_on_error` is requeued forever. Bounded retries belong in the handler.

use crate::runtime::config::ConsumerOptions;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue { delay: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    retry_on_error: bool,
    retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retry_on_error: bool, retry_delay: Duration) -> Self {
        Self {
            retry_on_error,
            retry_delay,
        }
    }

    pub fn from_options(options: &ConsumerOptions) -> Self {
        Self::new(options.retry_on_error(), options.retry_delay())
    }

    pub fn decide(&self, handler_succeeded: bool) -> Disposition {
        if handler_succeeded || !self.retry_on_error {
            return Disposition::Ack;
        }
        Disposition::Requeue {
            delay: self.retry_delay,
        }
    }
}
