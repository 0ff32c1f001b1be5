//! Raw purge (spec.md §3.2, §9): deletes `raw_hits` rows past retention.
//! Disabled by default — `PurgeConfig::enabled` must be explicitly opted
//! into, same posture as the teacher's `retention_enforcer` module.

use crate::config::PurgeConfig;
use chrono::Utc;
use clickhouse::{Client, Row};
use serde::Deserialize;

#[derive(Row, Deserialize)]
struct CountRow {
    value: u64,
}

/// Issue (or, in `dry_run`, just log) the `ALTER TABLE ... DELETE` for rows
/// older than `retain_days`. ClickHouse's mutation-based `DELETE` is
/// asynchronous server-side; this call only enqueues it.
pub async fn run(ch: &Client, config: &PurgeConfig) -> anyhow::Result<()> {
    if !config.enabled {
        return Ok(());
    }
    let cutoff = Utc::now() - chrono::Duration::days(config.retain_days as i64);
    if config.dry_run {
        let count = ch
            .query("SELECT count() AS value FROM tracepixel.raw_hits WHERE received_at < ?")
            .bind(cutoff)
            .fetch_optional::<CountRow>()
            .await?
            .map(|r| r.value)
            .unwrap_or(0);
        tracing::info!(retain_days = config.retain_days, would_delete = count, "purge dry run");
        return Ok(());
    }
    ch.query("ALTER TABLE tracepixel.raw_hits DELETE WHERE received_at < ?")
        .bind(cutoff)
        .execute()
        .await?;
    tracing::info!(retain_days = config.retain_days, "purge: mutation enqueued");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_by_default() {
        assert!(!PurgeConfig::default().enabled);
        assert!(PurgeConfig::default().dry_run);
    }
}
