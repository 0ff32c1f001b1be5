//! Fast enricher #3: fingerprint stability per source IP over a sliding 24h
//! window (spec.md §4.1.1.3). Sharded map with fine-grained per-key locking,
//! pruned by a background sweeper — spec.md §9's "concurrent maps with TTL
//! eviction" pattern.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

const WINDOW: Duration = Duration::hours(24);
const ALERT_THRESHOLD: usize = 3;
const SHARD_COUNT: usize = 16;

#[derive(Default)]
struct Entry {
    observations: Vec<(DateTime<Utc>, String)>,
}

pub struct FingerprintStabilityTracker {
    shards: Vec<Mutex<HashMap<String, Entry>>>,
}

#[derive(Debug, Clone, Copy)]
pub struct FingerprintStabilityResult {
    pub total_observations: usize,
    pub distinct_hashes: usize,
    pub rate_5min: usize,
    pub alert: bool,
}

impl FingerprintStabilityTracker {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, ip: &str) -> &Mutex<HashMap<String, Entry>> {
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in ip.bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        &self.shards[(hash as usize) % SHARD_COUNT]
    }

    /// Record one observation and return the current window stats.
    pub fn observe(&self, ip: &str, fingerprint_hash: &str) -> FingerprintStabilityResult {
        let now = Utc::now();
        let mut shard = self.shard_for(ip).lock().unwrap();
        let entry = shard.entry(ip.to_string()).or_default();
        entry.observations.push((now, fingerprint_hash.to_string()));
        entry.observations.retain(|(t, _)| now - *t <= WINDOW);

        let distinct: HashSet<&str> = entry
            .observations
            .iter()
            .map(|(_, fp)| fp.as_str())
            .collect();
        let rate_5min = entry
            .observations
            .iter()
            .filter(|(t, _)| now - *t <= Duration::minutes(5))
            .count();

        FingerprintStabilityResult {
            total_observations: entry.observations.len(),
            distinct_hashes: distinct.len(),
            rate_5min,
            alert: distinct.len() >= ALERT_THRESHOLD,
        }
    }

    /// Evict IPs with no observation inside the window. Run from a periodic
    /// sweeper task the way `alert_engine`/`slo_engine` run their periodic
    /// evaluation loops.
    pub fn prune_expired(&self) {
        let now = Utc::now();
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            shard.retain(|_, entry| {
                entry.observations.retain(|(t, _)| now - *t <= WINDOW);
                !entry.observations.is_empty()
            });
        }
    }
}

pub fn spawn_sweeper(tracker: std::sync::Arc<FingerprintStabilityTracker>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            ticker.tick().await;
            tracker.prune_expired();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_fires_at_three_distinct_fingerprints() {
        let tracker = FingerprintStabilityTracker::new();
        tracker.observe("1.2.3.4", "fp-a");
        tracker.observe("1.2.3.4", "fp-b");
        let result = tracker.observe("1.2.3.4", "fp-c");
        assert_eq!(result.distinct_hashes, 3);
        assert!(result.alert);
    }

    #[test]
    fn repeated_same_fingerprint_does_not_alert() {
        let tracker = FingerprintStabilityTracker::new();
        tracker.observe("5.6.7.8", "fp-a");
        tracker.observe("5.6.7.8", "fp-a");
        let result = tracker.observe("5.6.7.8", "fp-a");
        assert_eq!(result.distinct_hashes, 1);
        assert!(!result.alert);
    }
}
