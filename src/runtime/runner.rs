use crate::{Consumer, MessageHandler};
use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Drives a [`Consumer`] from a root [`CancellationToken`] and handles OS signals
/// for graceful shutdowns.
pub struct Runner<H: MessageHandler> {
    consumer: Consumer<H>,
    shutdown: CancellationToken,
    started: bool,
}

impl<H: MessageHandler> Runner<H> {
    pub fn new(consumer: Consumer<H>) -> Self {
        Self {
            consumer,
            shutdown: CancellationToken::new(),
            started: false,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn consumer(&self) -> &Consumer<H> {
        &self.consumer
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Starts the consumer under the root token. Calling it twice is a no-op.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        self.consumer.start(self.shutdown.clone()).await?;
        self.started = true;
        Ok(())
    }

    /// Replaces the consumer's worker generation, keeping the current root token.
    pub async fn reconnect(&mut self) -> Result<()> {
        let result = self.consumer.reconnect(self.shutdown.clone()).await;
        self.started = result.is_ok();
        result?;
        Ok(())
    }

    /// Cancels the root token and waits for every worker to exit.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();
        self.consumer.stop().await;
        self.started = false;
        self.reinitialize_shutdown_token();
        Ok(())
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!(
            queue = %self.consumer.queue(),
            "runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown"
        );

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
    }
}
