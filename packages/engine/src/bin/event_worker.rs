//! Event worker
//!
//! Consumes event ids from NATS, claims them and runs the matching trigger
//! conditions and reactions.

use std::sync::Arc;

use anyhow::{Context, Result};
use engine_core::config::Config;
use engine_core::engine::{Dispatcher, EventConsumer};
use engine_core::kernel::{BaseModuleDirectory, EngineDeps, NatsModuleTransport, PostgresStore};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,engine_core=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting event worker");

    let config = Config::from_env()?;

    // Database setup
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    if config.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        tracing::info!("Migrations applied");
    }

    // Message bus
    let client = async_nats::connect(&config.nats_url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats_url))?;
    tracing::info!(url = %config.nats_url, "Connected to NATS");

    let shutdown = CancellationToken::new();
    let transport = Arc::new(NatsModuleTransport::start(client.clone(), shutdown.clone()).await?);

    let store = Arc::new(PostgresStore::new(pool));
    let modules: Arc<dyn BaseModuleDirectory> = store.clone();
    let deps = EngineDeps::new(
        store.clone(),
        store.clone(),
        store.clone(),
        modules,
        store,
        transport,
        config.engine.clone(),
    );

    let consumer = EventConsumer::new(Dispatcher::new(deps));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown requested");
        signal.cancel();
    });

    consumer
        .run(
            client,
            config.event_subject.clone(),
            config.event_queue_group.clone(),
            shutdown,
        )
        .await?;

    tracing::info!("Event worker stopped");
    Ok(())
}
