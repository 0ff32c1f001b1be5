//! Shared mutable state behind the stateful pipeline steps (session
//! stitching, cross-customer intelligence, replay detection, dead-internet
//! aggregate, IP-geo cache). One instance lives for the worker process
//! lifetime; every step takes `&PipelineState` and mutates only its own
//! corner of it, the same "one big shared state struct, narrow per-module
//! access" shape `AppState` uses for the teacher's handlers.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

pub struct SessionState {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub last_hit_at: DateTime<Utc>,
    pub hit_num: u32,
    pub pages: Vec<String>,
}

pub struct CrossCustomerEntry {
    pub seen: Vec<(DateTime<Utc>, String)>,
}

pub struct ReplayEntry {
    pub fingerprint: String,
    pub seen_at: DateTime<Utc>,
}

pub struct IpGeoCacheEntry {
    pub asn: Option<String>,
    pub cached_at: DateTime<Utc>,
}

pub struct PipelineState {
    pub sessions: Mutex<HashMap<String, SessionState>>,
    pub cross_customer: Mutex<HashMap<String, CrossCustomerEntry>>,
    pub replay_hashes: Mutex<HashMap<u32, ReplayEntry>>,
    pub ip_geo_cache: Mutex<HashMap<String, IpGeoCacheEntry>>,
    pub dead_internet: Mutex<HashMap<String, DeadInternetAggregate>>,
    pub geo_api_semaphore: tokio::sync::Semaphore,
    pub http: reqwest::Client,
    pub maxmind: Option<maxminddb::Reader<Vec<u8>>>,
}

#[derive(Default, Clone, Copy)]
pub struct DeadInternetAggregate {
    pub total: u64,
    pub bot_like: u64,
}

impl PipelineState {
    pub fn new(geo_api_requests_per_minute: u32, maxmind: Option<maxminddb::Reader<Vec<u8>>>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            cross_customer: Mutex::new(HashMap::new()),
            replay_hashes: Mutex::new(HashMap::new()),
            ip_geo_cache: Mutex::new(HashMap::new()),
            dead_internet: Mutex::new(HashMap::new()),
            geo_api_semaphore: tokio::sync::Semaphore::new(geo_api_requests_per_minute.max(1) as usize),
            http: reqwest::Client::new(),
            maxmind,
        }
    }

    /// Refill the geo-API rate-limit semaphore back up to its configured
    /// capacity every minute (spec.md §4.3.1 step 5 — "throttled to 500
    /// req/min via a bounded semaphore").
    pub fn spawn_geo_rate_limit_refill(state: std::sync::Arc<PipelineState>, capacity: u32) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                ticker.tick().await;
                let available = state.geo_api_semaphore.available_permits();
                let capacity = capacity.max(1) as usize;
                if available < capacity {
                    state.geo_api_semaphore.add_permits(capacity - available);
                }
            }
        });
    }
}
