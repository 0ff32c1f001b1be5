//! ClickHouse schema bootstrap and the Raw ingest table (spec.md §3).
//!
//! Every statement is idempotent (`IF NOT EXISTS`) so it's safe to run on
//! every process startup, the same contract `migrations.rs::MIGRATIONS`
//! documents for the teacher's observability schema.

use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};

const MIGRATIONS: &[&str] = &[
    "CREATE DATABASE IF NOT EXISTS tracepixel",
    // ── Raw ingest (spec.md §3.2) ──
    r"CREATE TABLE IF NOT EXISTS tracepixel.raw_hits
(
    id              UInt64,
    received_at     DateTime64(6, 'UTC') CODEC(Delta, ZSTD(1)),
    company_id      LowCardinality(String),
    pixel_id        LowCardinality(String),
    ip_address      String,
    user_agent      String,
    referer         String,
    request_path    String,
    headers_json    String,
    query_string     String CODEC(ZSTD(3))
)
ENGINE = MergeTree
PARTITION BY toYYYYMM(received_at)
ORDER BY (received_at, id)
SETTINGS index_granularity = 8192",
    // ClickHouse has no autoincrement; a single-row counter table hands out
    // monotonically increasing Raw ids to the bulk writer.
    r"CREATE TABLE IF NOT EXISTS tracepixel.raw_id_seq
(
    k UInt8,
    next_id UInt64,
    updated_at DateTime64(6, 'UTC')
)
ENGINE = ReplacingMergeTree(updated_at)
ORDER BY k",
    // ── Watermarks (spec.md §3.5) ──
    r"CREATE TABLE IF NOT EXISTS tracepixel.watermarks
(
    process_name     LowCardinality(String),
    last_processed_id UInt64,
    last_run_at       DateTime64(6, 'UTC'),
    rows_processed    UInt64,
    rows_matched      UInt64
)
ENGINE = ReplacingMergeTree(last_run_at)
ORDER BY process_name",
    // ── Parsed (spec.md §3.3, representative column subset per phase group) ──
    r"CREATE TABLE IF NOT EXISTS tracepixel.parsed_hits
(
    source_id       UInt64,
    -- phase 1: server/screen/locale
    sw Nullable(UInt32), sh Nullable(UInt32), saw Nullable(UInt32), sah Nullable(UInt32),
    cd Nullable(UInt8), pd Nullable(Float64), vw Nullable(UInt32), vh Nullable(UInt32),
    tz Nullable(String), tzo Nullable(Int32), lang Nullable(String), langs Nullable(String),
    -- phase 2: browser/GPU/fingerprint
    browser Nullable(String), browser_ver Nullable(String), os Nullable(String), os_ver Nullable(String),
    device_type Nullable(String), canvas_fp Nullable(String), webgl_fp Nullable(String), audio_fp Nullable(String),
    fonts Nullable(String), gpu Nullable(String), gpu_vendor Nullable(String),
    -- phase 3: mouse/input
    mouse_entropy Nullable(Float64), move_timing_cv Nullable(Float64), move_speed_cv Nullable(Float64),
    -- phase 4: connection/hardware
    plt Nullable(String), vnd Nullable(String), cores Nullable(UInt8), mem Nullable(Float64), touch Nullable(UInt8),
    -- phase 5: bot/evasion
    bot_score Nullable(Float64), bot_signals Nullable(String), evasion_detected Nullable(UInt8),
    known_bot Nullable(UInt8), lead_score Nullable(Float64),
    -- phase 6: referrer/UTM
    utm_source Nullable(String), utm_medium Nullable(String), utm_campaign Nullable(String),
    -- phase 7/8: WebRTC/accessibility, media/performance omitted beyond representative set
    device_hash Nullable(String),
    cp_params String DEFAULT '{}'
)
ENGINE = MergeTree
ORDER BY source_id",
    // ── Dimensions (spec.md §3.4) — ReplacingMergeTree + FINAL reads ──
    r"CREATE TABLE IF NOT EXISTS tracepixel.devices
(
    device_hash        String,
    first_seen         DateTime64(6, 'UTC'),
    last_seen          DateTime64(6, 'UTC'),
    hit_count          UInt64,
    affluence_tier     LowCardinality(String),
    estimated_age_days Int32,
    updated_at         DateTime64(6, 'UTC')
)
ENGINE = ReplacingMergeTree(updated_at)
ORDER BY device_hash",
    r"CREATE TABLE IF NOT EXISTS tracepixel.ips
(
    ip_address      String,
    country         LowCardinality(String),
    region          String,
    city            String,
    latitude        Float64,
    longitude       Float64,
    asn             String,
    asn_org         String,
    is_datacenter   UInt8,
    last_refreshed  DateTime64(6, 'UTC'),
    updated_at      DateTime64(6, 'UTC')
)
ENGINE = ReplacingMergeTree(updated_at)
ORDER BY ip_address",
    r"CREATE TABLE IF NOT EXISTS tracepixel.visits
(
    visit_id     String,
    source_id    UInt64,
    company_id   LowCardinality(String),
    pixel_id     LowCardinality(String),
    device_hash  String,
    ip_address   String,
    match_email  String,
    received_at  DateTime64(6, 'UTC')
)
ENGINE = MergeTree
ORDER BY visit_id",
    r"CREATE TABLE IF NOT EXISTS tracepixel.matches
(
    company_id       LowCardinality(String),
    pixel_id         LowCardinality(String),
    match_type       LowCardinality(String),
    match_key        String,
    first_visit_id   String,
    latest_visit_id  String,
    first_seen       DateTime64(6, 'UTC'),
    last_seen        DateTime64(6, 'UTC'),
    hit_count        UInt64,
    individual_key   Nullable(String),
    address_key      Nullable(String),
    matched_at       Nullable(DateTime64(6, 'UTC')),
    updated_at       DateTime64(6, 'UTC')
)
ENGINE = ReplacingMergeTree(updated_at)
ORDER BY (company_id, pixel_id, match_type, match_key)",
    // ── Scoring tables (spec.md §3.6) ──
    r"CREATE TABLE IF NOT EXISTS tracepixel.visitor_scores
(
    visit_id             String,
    bot_score            Float64,
    anomaly_score        Float64,
    lead_score           Float64,
    mouse_authenticity   Float64,
    session_quality      Float64,
    composite_quality    Float64,
    computed_at          DateTime64(6, 'UTC')
)
ENGINE = MergeTree
ORDER BY visit_id",
    r"CREATE TABLE IF NOT EXISTS tracepixel.customer_summaries
(
    company_id              LowCardinality(String),
    period_type             LowCardinality(String),
    period_start             DateTime64(6, 'UTC'),
    total_hits              UInt64,
    bot_hits                UInt64,
    human_hits              UInt64,
    unknown_hits            UInt64,
    avg_mouse_authenticity  Float64,
    avg_session_quality     Float64,
    avg_composite_quality   Float64,
    unique_devices          UInt64,
    unique_ips              UInt64,
    matched_visitors        UInt64,
    dead_internet_index     Float64,
    updated_at              DateTime64(6, 'UTC')
)
ENGINE = ReplacingMergeTree(updated_at)
ORDER BY (company_id, period_type, period_start)",
    // External consumer directory (spec.md §4.5/§4.6): this system never
    // writes to it, only resolves `IndividualKey`/`AddressKey` by email or
    // IP. Declared here so a self-contained test fixture can seed it; a real
    // deployment points `StoreConnection` at a database where this table is
    // already populated by another system.
    r"CREATE TABLE IF NOT EXISTS tracepixel.consumer_directory
(
    record_id       UInt64,
    email           String,
    ip_address      String,
    individual_key  String,
    address_key     String
)
ENGINE = MergeTree
ORDER BY record_id",
];

/// Run every migration statement in order. Safe to call from all three
/// binaries on startup (Edge needs `raw_hits` + `raw_id_seq`; Worker needs the
/// same; the ETL scheduler needs everything).
pub async fn run_migrations(ch: &Client) -> anyhow::Result<()> {
    for stmt in MIGRATIONS {
        ch.query(stmt).execute().await?;
    }
    Ok(())
}

pub fn client_from_url(url: &str) -> anyhow::Result<Client> {
    // `url` is `scheme://host:port/database`; split the trailing path segment
    // off as the database name the way the teacher's `main.rs` takes
    // CLICKHOUSE_URL / CLICKHOUSE_DATABASE as separate env vars.
    let (base, database) = match url.rsplit_once('/') {
        Some((b, d)) if !d.is_empty() => (b.to_string(), d.to_string()),
        _ => (url.to_string(), "tracepixel".to_string()),
    };
    Ok(Client::default().with_url(base).with_database(database))
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct RawHitRow {
    pub id: u64,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub company_id: String,
    pub pixel_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub referer: String,
    pub request_path: String,
    pub headers_json: String,
    pub query_string: String,
}

/// Reserve `count` contiguous Raw ids from `raw_id_seq`. ClickHouse's lack of
/// multi-statement transactions means this is a best-effort reservation: at
/// least once, never exactly once, which is why the ETL dedupes downstream by
/// upsert key rather than relying on Raw id uniqueness for correctness.
pub async fn reserve_raw_ids(ch: &Client, count: u64) -> anyhow::Result<u64> {
    #[derive(Row, Deserialize)]
    struct NextId {
        next_id: u64,
    }
    let current = ch
        .query("SELECT next_id FROM tracepixel.raw_id_seq FINAL WHERE k = 0")
        .fetch_optional::<NextId>()
        .await?
        .map(|r| r.next_id)
        .unwrap_or(1);

    #[derive(Row, Serialize)]
    struct SeqRow {
        k: u8,
        next_id: u64,
        updated_at: chrono::DateTime<chrono::Utc>,
    }
    let mut insert = ch.insert("tracepixel.raw_id_seq")?;
    insert
        .write(&SeqRow {
            k: 0,
            next_id: current + count,
            updated_at: chrono::Utc::now(),
        })
        .await?;
    insert.end().await?;
    Ok(current)
}

pub async fn insert_raw_batch(
    ch: &Client,
    records: &[(u64, crate::record::TrackingRecord)],
) -> anyhow::Result<()> {
    let mut insert = ch.insert("tracepixel.raw_hits")?;
    for (id, record) in records {
        insert
            .write(&RawHitRow {
                id: *id,
                received_at: record.received_at,
                company_id: record.company_id.clone(),
                pixel_id: record.pixel_id.clone(),
                ip_address: record.ip_address.clone(),
                user_agent: record.user_agent.clone(),
                referer: record.referer.clone(),
                request_path: record.request_path.clone(),
                headers_json: record.headers_json.clone(),
                query_string: record.query_string.clone(),
            })
            .await?;
    }
    insert.end().await?;
    Ok(())
}
