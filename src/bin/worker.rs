//! Worker process entry point (spec.md §4.2–§4.3): spool replay + IPC intake,
//! the 15-step enrichment pipeline, and the bulk writer.

use std::sync::Arc;
use tracepixel::config::Config;
use tracepixel::store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::load("tracepixel.toml")?);
    let ch = store::client_from_url(&config.store_connection)?;
    store::run_migrations(&ch).await?;

    let writer_handle = tracepixel::worker::run(config, ch).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("worker: shutdown signal received");
        }
        result = writer_handle => {
            if let Err(err) = result {
                tracing::error!("worker: writer task panicked: {err}");
            }
        }
    }
    Ok(())
}
