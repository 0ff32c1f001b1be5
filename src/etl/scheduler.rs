//! ETL scheduler: one interval loop running the four batch procedures plus
//! purge in sequence (spec.md §4.4–§4.7, §9). Shaped like the teacher's
//! `slo_engine::spawn_slo_engine` — a single `tokio::time::interval` loop
//! that logs per-procedure failures instead of aborting the cycle, since a
//! failed MatchVisits run must not block ParseNewHits from advancing next
//! tick.

use crate::config::Config;
use crate::etl;
use crate::models::tenant_config::TenantConfigDb;
use chrono::Utc;
use clickhouse::Client;
use std::sync::Arc;
use std::time::Duration;

pub async fn run(config: Arc<Config>, ch: Client, tenant_config: Arc<TenantConfigDb>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(config.etl_interval_seconds));
    loop {
        ticker.tick().await;
        run_cycle(&config, &ch, &tenant_config).await;
    }
}

async fn run_cycle(config: &Config, ch: &Client, tenant_config: &TenantConfigDb) {
    match etl::parse_hits::run(ch, config.etl_batch_size).await {
        Ok(outcome) => tracing::info!(rows = outcome.rows_processed, max_id = outcome.max_id, "ParseNewHits complete"),
        Err(err) => tracing::error!(error = %err, "ParseNewHits failed"),
    }

    match etl::match_visits::run(ch, tenant_config, config.etl_batch_size).await {
        Ok(outcome) => tracing::info!(
            rows = outcome.rows_processed,
            matched = outcome.rows_matched,
            "MatchVisits complete"
        ),
        Err(err) => tracing::error!(error = %err, "MatchVisits failed"),
    }

    match etl::match_legacy::run(ch, tenant_config, config.etl_batch_size).await {
        Ok(outcome) => tracing::info!(
            rows = outcome.rows_processed,
            matched = outcome.rows_matched,
            "MatchLegacyVisits complete"
        ),
        Err(err) => tracing::error!(error = %err, "MatchLegacyVisits failed"),
    }

    match etl::materialize::run_visitor_scores(ch, config.etl_batch_size).await {
        Ok(outcome) => tracing::info!(rows = outcome.rows_processed, "MaterializeScores complete"),
        Err(err) => tracing::error!(error = %err, "MaterializeScores failed"),
    }

    match etl::materialize::run_customer_summary(ch, Utc::now()).await {
        Ok(rows) => tracing::info!(rows, "CustomerSummary rollup complete"),
        Err(err) => tracing::error!(error = %err, "CustomerSummary rollup failed"),
    }

    if let Err(err) = etl::purge::run(ch, &config.purge).await {
        tracing::error!(error = %err, "purge failed");
    }
}
