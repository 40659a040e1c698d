use anyhow::Error as AnyError;
use std::fmt;

/// Error surfaced by [`crate::Consumer::start`] and [`crate::Consumer::reconnect`].
///
/// Per-message failures never reach this type; they are logged and absorbed by
/// the worker that observed them.
#[derive(Debug)]
pub enum ConsumerError {
    /// Opening the delivery source for `queue` failed. No workers were launched.
    ConnectionFailure { queue: String, source: AnyError },
}

impl ConsumerError {
    pub(crate) fn connection_failure(queue: &str, source: AnyError) -> Self {
        ConsumerError::ConnectionFailure {
            queue: queue.to_owned(),
            source,
        }
    }

    /// Name of the queue the failed operation was bound to.
    pub fn queue(&self) -> &str {
        match self {
            ConsumerError::ConnectionFailure { queue, .. } => queue,
        }
    }

    pub fn is_connection_failure(&self) -> bool {
        matches!(self, ConsumerError::ConnectionFailure { .. })
    }
}

impl fmt::Display for ConsumerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerError::ConnectionFailure { queue, source } => {
                write!(f, "failed to open delivery source for queue {queue}: {source}")
            }
        }
    }
}

impl std::error::Error for ConsumerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConsumerError::ConnectionFailure { source, .. } => Some(source.as_ref()),
        }
    }
}

/// Failure reported by the broker when finalizing a single delivery.
#[derive(Debug)]
pub enum DeliveryError {
    Ack { delivery_tag: u64, source: AnyError },
    Reject {
        delivery_tag: u64,
        requeue: bool,
        source: AnyError,
    },
}

impl DeliveryError {
    pub fn delivery_tag(&self) -> u64 {
        match self {
            DeliveryError::Ack { delivery_tag, .. } | DeliveryError::Reject { delivery_tag, .. } => {
                *delivery_tag
            }
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Ack {
                delivery_tag,
                source,
            } => write!(f, "ack of delivery {delivery_tag} failed: {source}"),
            DeliveryError::Reject {
                delivery_tag,
                requeue,
                source,
            } => write!(
                f,
                "reject (requeue={requeue}) of delivery {delivery_tag} failed: {source}"
            ),
        }
    }
}

impl std::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeliveryError::Ack { source, .. } | DeliveryError::Reject { source, .. } => {
                Some(source.as_ref())
            }
        }
    }
}
