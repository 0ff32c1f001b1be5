//! ETL — ParseNewHits (spec.md §4.4). Projects each Raw row into Parsed,
//! upserts Device/IP, and inserts the Visit fact row.
//!
//! ClickHouse has no multi-statement transactions, so "single transaction"
//! from spec.md's sequence is approximated by: self-heal first, compute the
//! batch range, then write Parsed/Device/IP/Visit for the whole range before
//! advancing the watermark. A crash mid-batch leaves partial writes that the
//! next run's self-heal step (against Parsed's own max `source_id`) folds
//! back in rather than reprocessing — the same "upsert-by-key absorbs
//! at-least-once replay" posture as the bulk writer.

use crate::etl::BatchOutcome;
use crate::models::watermark::{WatermarkStore, PROC_PARSE_NEW_HITS};
use crate::record::lookup_param_as;
use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Row, Deserialize)]
struct RawHitRow {
    id: u64,
    received_at: DateTime<Utc>,
    company_id: String,
    pixel_id: String,
    ip_address: String,
    query_string: String,
}

#[derive(Debug, Row, Serialize)]
struct ParsedHitRow {
    source_id: u64,
    sw: Option<u32>,
    sh: Option<u32>,
    saw: Option<u32>,
    sah: Option<u32>,
    cd: Option<u8>,
    pd: Option<f64>,
    vw: Option<u32>,
    vh: Option<u32>,
    tz: Option<String>,
    tzo: Option<i32>,
    lang: Option<String>,
    langs: Option<String>,
    browser: Option<String>,
    browser_ver: Option<String>,
    os: Option<String>,
    os_ver: Option<String>,
    device_type: Option<String>,
    canvas_fp: Option<String>,
    webgl_fp: Option<String>,
    audio_fp: Option<String>,
    fonts: Option<String>,
    gpu: Option<String>,
    gpu_vendor: Option<String>,
    mouse_entropy: Option<f64>,
    move_timing_cv: Option<f64>,
    move_speed_cv: Option<f64>,
    plt: Option<String>,
    vnd: Option<String>,
    cores: Option<u8>,
    mem: Option<f64>,
    touch: Option<u8>,
    bot_score: Option<f64>,
    bot_signals: Option<String>,
    evasion_detected: Option<u8>,
    known_bot: Option<u8>,
    lead_score: Option<f64>,
    utm_source: Option<String>,
    utm_medium: Option<String>,
    utm_campaign: Option<String>,
    device_hash: Option<String>,
    cp_params: String,
}

#[derive(Row, Deserialize)]
struct MaxIdRow {
    #[serde(rename = "max(id)")]
    max_id: u64,
}

#[derive(Row, Deserialize)]
struct MaxSourceIdRow {
    #[serde(rename = "max(source_id)")]
    max_source_id: u64,
}

pub async fn run(ch: &Client, batch_size: u64) -> anyhow::Result<BatchOutcome> {
    let watermarks = WatermarkStore::new(ch);
    let max_parsed = ch
        .query("SELECT max(source_id) FROM tracepixel.parsed_hits")
        .fetch_optional::<MaxSourceIdRow>()
        .await?
        .map(|r| r.max_source_id)
        .unwrap_or(0);
    let last_id = watermarks.self_heal(PROC_PARSE_NEW_HITS, max_parsed).await?;

    let max_raw = ch
        .query("SELECT max(id) FROM tracepixel.raw_hits")
        .fetch_optional::<MaxIdRow>()
        .await?
        .map(|r| r.max_id)
        .unwrap_or(0);
    let max_id = (last_id + batch_size).min(max_raw);
    if max_id <= last_id {
        return Ok(BatchOutcome { max_id: last_id, ..Default::default() });
    }

    let rows = ch
        .query("SELECT id, received_at, company_id, pixel_id, ip_address, query_string \
                 FROM tracepixel.raw_hits WHERE id > ? AND id <= ? ORDER BY id")
        .bind(last_id)
        .bind(max_id)
        .fetch_all::<RawHitRow>()
        .await?;

    let mut parsed_insert = ch.insert("tracepixel.parsed_hits")?;
    let mut visit_insert = ch.insert("tracepixel.visits")?;
    let mut device_insert = ch.insert("tracepixel.devices")?;
    let mut ip_insert = ch.insert("tracepixel.ips")?;
    let now = Utc::now();

    for row in &rows {
        let qs = &row.query_string;
        let device_hash = crate::worker::pipeline::device_hash(&crate::record::TrackingRecord::new(
            row.company_id.clone(),
            row.pixel_id.clone(),
            row.ip_address.clone(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            qs.clone(),
        ));

        parsed_insert
            .write(&ParsedHitRow {
                source_id: row.id,
                sw: lookup_param_as(qs, "sw"),
                sh: lookup_param_as(qs, "sh"),
                saw: lookup_param_as(qs, "saw"),
                sah: lookup_param_as(qs, "sah"),
                cd: lookup_param_as(qs, "cd"),
                pd: lookup_param_as(qs, "pd"),
                vw: lookup_param_as(qs, "vw"),
                vh: lookup_param_as(qs, "vh"),
                tz: lookup_param_as(qs, "tz"),
                tzo: lookup_param_as(qs, "tzo"),
                lang: lookup_param_as(qs, "lang"),
                langs: lookup_param_as(qs, "langs"),
                browser: lookup_param_as(qs, "_srv_browser"),
                browser_ver: lookup_param_as(qs, "_srv_browserVer"),
                os: lookup_param_as(qs, "_srv_os"),
                os_ver: lookup_param_as(qs, "_srv_osVer"),
                device_type: lookup_param_as(qs, "_srv_deviceType"),
                canvas_fp: lookup_param_as(qs, "canvasFP"),
                webgl_fp: lookup_param_as(qs, "webglFP"),
                audio_fp: lookup_param_as(qs, "audioFP"),
                fonts: lookup_param_as(qs, "fonts"),
                gpu: lookup_param_as(qs, "gpu"),
                gpu_vendor: lookup_param_as(qs, "gpuVendor"),
                mouse_entropy: lookup_param_as(qs, "mouseEntropy"),
                move_timing_cv: lookup_param_as(qs, "moveTimingCV"),
                move_speed_cv: lookup_param_as(qs, "moveSpeedCV"),
                plt: lookup_param_as(qs, "plt"),
                vnd: lookup_param_as(qs, "vnd"),
                cores: lookup_param_as(qs, "cores"),
                mem: lookup_param_as(qs, "mem"),
                touch: lookup_param_as(qs, "touch"),
                bot_score: lookup_param_as(qs, "botScore"),
                bot_signals: lookup_param_as(qs, "botSignals"),
                evasion_detected: lookup_param_as(qs, "evasionDetected"),
                known_bot: lookup_param_as(qs, "_srv_knownBot"),
                lead_score: lookup_param_as(qs, "_srv_leadScore"),
                utm_source: lookup_param_as(qs, "utm_source"),
                utm_medium: lookup_param_as(qs, "utm_medium"),
                utm_campaign: lookup_param_as(qs, "utm_campaign"),
                device_hash: Some(device_hash.clone()),
                cp_params: custom_param_json(qs),
            })
            .await?;

        device_insert
            .write(&crate::models::dimension::Device {
                device_hash: device_hash.clone(),
                first_seen: row.received_at,
                last_seen: row.received_at,
                hit_count: 1,
                affluence_tier: lookup_param_as(qs, "_srv_affluence").unwrap_or_else(|| "LOW".to_string()),
                estimated_age_days: 0,
                updated_at: now,
            })
            .await?;

        ip_insert
            .write(&crate::models::dimension::IpDimension {
                ip_address: row.ip_address.clone(),
                country: lookup_param_as(qs, "_srv_mmCC").unwrap_or_default(),
                region: lookup_param_as(qs, "_srv_mmReg").unwrap_or_default(),
                city: lookup_param_as(qs, "_srv_mmCity").unwrap_or_default(),
                latitude: lookup_param_as(qs, "_srv_mmLat").unwrap_or(0.0),
                longitude: lookup_param_as(qs, "_srv_mmLon").unwrap_or(0.0),
                asn: lookup_param_as(qs, "_srv_mmASN").unwrap_or_default(),
                asn_org: lookup_param_as(qs, "_srv_mmASNOrg").unwrap_or_default(),
                is_datacenter: lookup_param_as::<u8>(qs, "_srv_datacenter").unwrap_or(0) == 1,
                last_refreshed: now,
                updated_at: now,
            })
            .await?;

        visit_insert
            .write(&crate::models::dimension::Visit {
                visit_id: uuid::Uuid::new_v4().to_string(),
                source_id: row.id,
                company_id: row.company_id.clone(),
                pixel_id: row.pixel_id.clone(),
                device_hash,
                ip_address: row.ip_address.clone(),
                match_email: lookup_param_as(qs, "email").unwrap_or_default(),
                received_at: row.received_at,
            })
            .await?;
    }

    parsed_insert.end().await?;
    visit_insert.end().await?;
    device_insert.end().await?;
    ip_insert.end().await?;

    watermarks
        .advance(PROC_PARSE_NEW_HITS, max_id, rows.len() as u64, 0)
        .await?;

    Ok(BatchOutcome {
        rows_processed: rows.len() as u64,
        rows_matched: 0,
        max_id,
    })
}

/// Aggregate `_cp_*` custom-parameter pairs into a JSON object (spec.md §4.4
/// Phase 12).
fn custom_param_json(qs: &str) -> String {
    let mut map = serde_json::Map::new();
    for pair in qs.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if let Some(name) = key.strip_prefix("_cp_") {
            if let Ok(decoded) = urlencoding::decode(value) {
                map.insert(name.to_string(), serde_json::Value::String(decoded.into_owned()));
            }
        }
    }
    serde_json::Value::Object(map).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_param_json_collects_only_cp_prefixed_keys() {
        let json = custom_param_json("sw=1920&_cp_plan=pro&_cp_seats=5&_srv_browser=Chrome");
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["plan"], "pro");
        assert_eq!(parsed["seats"], "5");
        assert!(parsed.get("sw").is_none());
    }
}
