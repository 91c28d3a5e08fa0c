//! Application lifecycle management and graceful shutdown.
//!
//! When a shutdown signal is received (Ctrl+C or SIGTERM):
//! 1. The HTTP server stops accepting new connections
//! 2. A shutdown signal is broadcast to every consumer
//! 3. Each consumer finishes and settles its in-flight message, bounded by
//!    the configured shutdown timeout
//! 4. Clean exit

use complementary_runtime::MessageConsumer;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Running application with all background tasks.
pub struct Application {
    /// TCP listener for the HTTP server
    listener: tokio::net::TcpListener,

    /// Axum router with all HTTP routes
    router: axum::Router,

    /// Broker consumers, spawned on `run`
    consumers: Vec<MessageConsumer>,

    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,

    /// Time each consumer gets to stop
    shutdown_timeout: Duration,
}

impl Application {
    /// Create a new application instance.
    ///
    /// `consumers` must have been built with receivers of `shutdown_tx`.
    #[must_use]
    pub fn new(
        listener: tokio::net::TcpListener,
        router: axum::Router,
        consumers: Vec<MessageConsumer>,
        shutdown_tx: broadcast::Sender<()>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            router,
            consumers,
            shutdown_tx,
            shutdown_timeout,
        }
    }

    /// Address the HTTP server is bound to.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the listener's address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until the process receives Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` completes, then stop everything gracefully.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), Box<dyn std::error::Error>> {
        info!(consumer_count = self.consumers.len(), "Starting consumers");
        let consumer_handles: Vec<_> = self
            .consumers
            .into_iter()
            .map(|consumer| {
                let name = consumer.name().to_string();
                (name, consumer.spawn())
            })
            .collect();

        info!(address = ?self.listener.local_addr().ok(), "HTTP server listening for requests");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped, initiating graceful shutdown...");

        // Receivers may already be gone if a consumer exited on its own
        let _ = self.shutdown_tx.send(());

        Self::await_shutdown(consumer_handles, self.shutdown_timeout).await;

        info!("Graceful shutdown complete");
        Ok(())
    }

    async fn await_shutdown(
        handles: Vec<(String, tokio::task::JoinHandle<()>)>,
        timeout: Duration,
    ) {
        for (consumer, handle) in handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(consumer = %consumer, "Consumer stopped gracefully"),
                Ok(Err(e)) => warn!(consumer = %consumer, error = %e, "Consumer task failed"),
                Err(_) => warn!(consumer = %consumer, "Consumer shutdown timed out"),
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// A signal whose handler cannot be installed never fires; the other one
/// still does.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
