use crate::runtime::telemetry;
use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_WORKERS: usize = 1;

/// Runtime configuration for a [`crate::Consumer`].
///
/// All instances must be constructed via [`ConsumerOptions::builder`] or [`ConsumerOptions::new`]
/// so invariants are validated before any worker observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    workers: usize,
    retry_on_error: bool,
    retry_delay: Duration,
    metrics_interval: Duration,
}

pub struct ConsumerOptionsParams {
    pub workers: usize,
    pub retry_on_error: bool,
    pub retry_delay: Duration,
    pub metrics_interval: Duration,
}

impl ConsumerOptions {
    /// Returns a builder to incrementally construct and validate options.
    pub fn builder() -> ConsumerOptionsBuilder {
        ConsumerOptionsBuilder::default()
    }

    /// Constructs options directly from the provided values, running validation.
    pub fn new(params: ConsumerOptionsParams) -> Result<Self> {
        let ConsumerOptionsParams {
            workers,
            retry_on_error,
            retry_delay,
            metrics_interval,
        } = params;

        let options = Self {
            workers,
            retry_on_error,
            retry_delay,
            metrics_interval,
        };

        options.validate()?;
        Ok(options)
    }

    /// Number of concurrent worker loops launched per generation.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Whether a failing handler requeues the message instead of acknowledging it.
    pub fn retry_on_error(&self) -> bool {
        self.retry_on_error
    }

    /// Per-worker pause applied before requeueing a failed message.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing options instance.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry_on_error: false,
            retry_delay: Duration::ZERO,
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConsumerOptionsBuilder {
    workers: Option<usize>,
    retry_on_error: Option<bool>,
    retry_delay: Option<Duration>,
    metrics_interval: Option<Duration>,
}

impl ConsumerOptionsBuilder {
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = Some(count);
        self
    }

    pub fn retry_on_error(mut self, enabled: bool) -> Self {
        self.retry_on_error = Some(enabled);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<ConsumerOptions> {
        let params = ConsumerOptionsParams {
            workers: self.workers.unwrap_or(DEFAULT_WORKERS),
            retry_on_error: self.retry_on_error.unwrap_or(false),
            retry_delay: self.retry_delay.unwrap_or(Duration::ZERO),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        ConsumerOptions::new(params)
    }
}
