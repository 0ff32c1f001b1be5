//! ETL process entry point (spec.md §4.4–§4.7, §9): the watermark-driven
//! batch scheduler.

use std::sync::Arc;
use tracepixel::config::Config;
use tracepixel::etl::scheduler;
use tracepixel::models::tenant_config::TenantConfigDb;
use tracepixel::store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::load("tracepixel.toml")?);
    let ch = store::client_from_url(&config.store_connection)?;
    store::run_migrations(&ch).await?;
    let tenant_config = Arc::new(TenantConfigDb::open(&config.tenant_config_db)?);

    tokio::select! {
        _ = scheduler::run(config, ch, tenant_config) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("etl: shutdown signal received");
        }
    }
    Ok(())
}
