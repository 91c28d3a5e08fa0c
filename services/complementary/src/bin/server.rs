//! Complementary Services Server
//!
//! This binary:
//! - Connects to `PostgreSQL` and runs migrations
//! - Connects to `RedPanda` for provider requests and responses
//! - Consumes provider responses and settles service requests
//! - Serves the notification websocket
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run server
//! cargo run --bin server
//! ```

use complementary_services::{Config, build_application};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,complementary_services=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Complementary Services Server...");

    let config = Config::from_env();
    tracing::info!(
        redpanda = %config.redpanda.brokers,
        response_queue = %config.messaging.response_queue,
        address = %config.server.address(),
        "Configuration loaded"
    );

    let app = build_application(config).await?;
    tracing::info!("Application initialized, press Ctrl+C to shutdown");

    app.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
