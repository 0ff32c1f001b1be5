//! Per-process batch watermark (spec.md §3.5).

use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};

pub const PROC_PARSE_NEW_HITS: &str = "ParseNewHits";
pub const PROC_MATCH_VISITS: &str = "MatchVisits";
pub const PROC_MATCH_LEGACY_VISITS: &str = "MatchLegacyVisits";
pub const PROC_MATERIALIZE_SCORES: &str = "MaterializeScores";

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct Watermark {
    pub process_name: String,
    pub last_processed_id: u64,
    pub last_run_at: DateTime<Utc>,
    pub rows_processed: u64,
    pub rows_matched: u64,
}

/// Thin accessor over the `watermarks` `ReplacingMergeTree` table. Every read
/// uses `FINAL` to get the latest version of the single row per process.
pub struct WatermarkStore<'a> {
    ch: &'a Client,
}

impl<'a> WatermarkStore<'a> {
    pub fn new(ch: &'a Client) -> Self {
        Self { ch }
    }

    pub async fn read(&self, process_name: &str) -> anyhow::Result<Watermark> {
        let row = self
            .ch
            .query(
                "SELECT process_name, last_processed_id, last_run_at, rows_processed, rows_matched \
                 FROM watermarks FINAL WHERE process_name = ?",
            )
            .bind(process_name)
            .fetch_optional::<Watermark>()
            .await?;
        Ok(row.unwrap_or(Watermark {
            process_name: process_name.to_string(),
            last_processed_id: 0,
            last_run_at: DateTime::<Utc>::UNIX_EPOCH,
            rows_processed: 0,
            rows_matched: 0,
        }))
    }

    /// Advance the watermark. Callers must never pass a `last_processed_id`
    /// lower than the current stored value — invariant 2 of spec.md §8.
    pub async fn advance(
        &self,
        process_name: &str,
        last_processed_id: u64,
        rows_processed: u64,
        rows_matched: u64,
    ) -> anyhow::Result<()> {
        let current = self.read(process_name).await?;
        let next_id = current.last_processed_id.max(last_processed_id);
        let mut insert = self.ch.insert("watermarks")?;
        insert
            .write(&Watermark {
                process_name: process_name.to_string(),
                last_processed_id: next_id,
                last_run_at: Utc::now(),
                rows_processed,
                rows_matched,
            })
            .await?;
        insert.end().await?;
        Ok(())
    }

    /// Self-heal: if `downstream_max_id` (the observed high-water mark in the
    /// downstream table) exceeds the stored watermark, advance to match
    /// before new work is selected (spec.md §3.5, §4.4 step 2).
    pub async fn self_heal(&self, process_name: &str, downstream_max_id: u64) -> anyhow::Result<u64> {
        let current = self.read(process_name).await?;
        if downstream_max_id > current.last_processed_id {
            self.advance(
                process_name,
                downstream_max_id,
                current.rows_processed,
                current.rows_matched,
            )
            .await?;
            return Ok(downstream_max_id);
        }
        Ok(current.last_processed_id)
    }
}
