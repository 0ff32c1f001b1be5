//! ETL — MatchVisits (spec.md §4.5): resolves browser-supplied emails
//! against the external consumer directory and upserts Match rows.

use crate::etl::BatchOutcome;
use crate::models::dimension::{Match, MATCH_TYPE_EMAIL};
use crate::models::tenant_config::TenantConfigDb;
use crate::models::watermark::{WatermarkStore, PROC_MATCH_VISITS};
use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Row, Deserialize)]
struct CandidateVisit {
    source_id: u64,
    visit_id: String,
    company_id: String,
    pixel_id: String,
    match_email: String,
    received_at: DateTime<Utc>,
}

#[derive(Debug, Row, Deserialize)]
struct DirectoryHit {
    individual_key: String,
    address_key: String,
}

/// Fields `MAX()`-reduced across duplicate emails within one batch (spec.md
/// §4.5 step 5, "source deduplication").
struct Dedup {
    company_id: String,
    pixel_id: String,
    latest_visit_id: String,
    last_seen: DateTime<Utc>,
    hit_count: u64,
}

pub async fn run(ch: &Client, tenant_config: &TenantConfigDb, batch_size: u64) -> anyhow::Result<BatchOutcome> {
    let watermarks = WatermarkStore::new(ch);

    #[derive(Row, Deserialize)]
    struct MaxRow {
        value: u64,
    }
    let max_matched_source = ch
        .query(
            "SELECT max(v.source_id) AS value FROM tracepixel.visits v \
             INNER JOIN tracepixel.matches m ON v.visit_id = m.latest_visit_id \
             WHERE m.match_type = ?",
        )
        .bind(MATCH_TYPE_EMAIL)
        .fetch_optional::<MaxRow>()
        .await?
        .map(|r| r.value)
        .unwrap_or(0);
    let last_id = watermarks.self_heal(PROC_MATCH_VISITS, max_matched_source).await?;

    let max_visit_id = ch
        .query("SELECT max(source_id) AS value FROM tracepixel.visits")
        .fetch_optional::<MaxRow>()
        .await?
        .map(|r| r.value)
        .unwrap_or(0);
    let max_id = (last_id + batch_size).min(max_visit_id);
    if max_id <= last_id {
        return Ok(BatchOutcome { max_id: last_id, ..Default::default() });
    }

    let candidates = ch
        .query(
            "SELECT source_id, visit_id, company_id, pixel_id, match_email, received_at \
             FROM tracepixel.visits \
             WHERE source_id > ? AND source_id <= ? AND match_email != '' AND length(match_email) > 5 \
               AND position(match_email, '@') > 0",
        )
        .bind(last_id)
        .bind(max_id)
        .fetch_all::<CandidateVisit>()
        .await?;

    let mut grouped: HashMap<(String, String, String), Dedup> = HashMap::new();
    for candidate in candidates {
        let normalized_email = candidate.match_email.trim().to_ascii_lowercase();
        if !tenant_config.flags(&candidate.company_id, &candidate.pixel_id)?.match_email_enabled {
            continue;
        }
        let key = (candidate.company_id.clone(), candidate.pixel_id.clone(), normalized_email);
        grouped
            .entry(key)
            .and_modify(|d| {
                if candidate.received_at > d.last_seen {
                    d.last_seen = candidate.received_at;
                    d.latest_visit_id = candidate.visit_id.clone();
                }
                d.hit_count += 1;
            })
            .or_insert(Dedup {
                company_id: candidate.company_id,
                pixel_id: candidate.pixel_id,
                latest_visit_id: candidate.visit_id,
                last_seen: candidate.received_at,
                hit_count: 1,
            });
    }

    let now = Utc::now();
    let mut matched = 0u64;
    let mut insert = ch.insert("tracepixel.matches")?;
    for ((company_id, pixel_id, normalized_email), dedup) in &grouped {
        let directory_hit = ch
            .query(
                "SELECT individual_key, address_key FROM tracepixel.consumer_directory \
                 WHERE email = ? ORDER BY record_id DESC LIMIT 1",
            )
            .bind(normalized_email.as_str())
            .fetch_optional::<DirectoryHit>()
            .await?;

        let existing = ch
            .query(
                "SELECT company_id, pixel_id, match_type, match_key, first_visit_id, latest_visit_id, \
                        first_seen, last_seen, hit_count, individual_key, address_key, matched_at, updated_at \
                 FROM tracepixel.matches FINAL \
                 WHERE company_id = ? AND pixel_id = ? AND match_type = ? AND match_key = ?",
            )
            .bind(company_id.as_str())
            .bind(pixel_id.as_str())
            .bind(MATCH_TYPE_EMAIL)
            .bind(normalized_email.as_str())
            .fetch_optional::<Match>()
            .await?;

        let source = Match {
            company_id: company_id.clone(),
            pixel_id: pixel_id.clone(),
            match_type: MATCH_TYPE_EMAIL.to_string(),
            match_key: normalized_email.clone(),
            first_visit_id: dedup.latest_visit_id.clone(),
            latest_visit_id: dedup.latest_visit_id.clone(),
            first_seen: dedup.last_seen,
            last_seen: dedup.last_seen,
            hit_count: dedup.hit_count,
            individual_key: directory_hit.as_ref().map(|h| h.individual_key.clone()),
            address_key: directory_hit.as_ref().map(|h| h.address_key.clone()),
            matched_at: directory_hit.as_ref().map(|_| now),
            updated_at: now,
        };

        let merged = match existing {
            Some(existing) => Match::merge_existing(&existing, &source, now),
            None => source,
        };
        if merged.matched_at.is_some() {
            matched += 1;
        }
        insert.write(&merged).await?;
    }
    insert.end().await?;

    watermarks
        .advance(PROC_MATCH_VISITS, max_id, grouped.len() as u64, matched)
        .await?;

    Ok(BatchOutcome {
        rows_processed: grouped.len() as u64,
        rows_matched: matched,
        max_id,
    })
}
