//! Step 13: behavioral-replay hash (spec.md §4.3.1). Quantizes the mouse
//! path to a 10px/100ms grid, hashes it with FNV-1a, and checks a retained
//! map of recent hashes for a collision under a *different* fingerprint —
//! the signature of a recorded mouse trace being replayed by automation.

use super::state::{PipelineState, ReplayEntry};
use crate::record::TrackingRecord;
use chrono::{Duration, Utc};

const GRID_PX: i64 = 10;
const TIME_BUCKET_MS: i64 = 100;
const RETENTION: Duration = Duration::hours(1);

fn quantized_path_hash(mouse_path: &str) -> Option<u32> {
    if mouse_path.is_empty() {
        return None;
    }
    let mut hash: u32 = 0x811c9dc5;
    for point in mouse_path.split('|') {
        let mut parts = point.splitn(3, ',');
        let x: i64 = parts.next()?.parse().ok()?;
        let y: i64 = parts.next()?.parse().ok()?;
        let t: i64 = parts.next()?.parse().ok()?;
        let qx = x / GRID_PX;
        let qy = y / GRID_PX;
        let qt = t / TIME_BUCKET_MS;
        for byte in qx.to_le_bytes().iter().chain(qy.to_le_bytes().iter()).chain(qt.to_le_bytes().iter()) {
            hash ^= *byte as u32;
            hash = hash.wrapping_mul(0x01000193);
        }
    }
    Some(hash)
}

/// `_srv_replayDetected`, `_srv_replayMatchFP`.
pub fn run(state: &PipelineState, record: &TrackingRecord, fingerprint: &str) -> TrackingRecord {
    let Some(mouse_path) = record.lookup("mousePath") else {
        return record.with_enrichment("replayDetected", "0");
    };
    let Some(hash) = quantized_path_hash(&mouse_path) else {
        return record.with_enrichment("replayDetected", "0");
    };

    let now = Utc::now();
    let mut map = state.replay_hashes.lock().unwrap();
    map.retain(|_, entry| now - entry.seen_at <= RETENTION);

    let result = match map.get(&hash) {
        Some(entry) if entry.fingerprint != fingerprint => {
            record
                .with_enrichment("replayDetected", "1")
                .with_enrichment("replayMatchFP", &entry.fingerprint)
        }
        _ => record.with_enrichment("replayDetected", "0"),
    };

    map.insert(
        hash,
        ReplayEntry {
            fingerprint: fingerprint.to_string(),
            seen_at: now,
        },
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_path(path: &str) -> TrackingRecord {
        TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(), format!("mousePath={path}"),
        )
    }

    #[test]
    fn identical_path_from_a_different_fingerprint_is_a_replay() {
        let state = PipelineState::new(500, None);
        run(&state, &record_with_path("10,10,0|20,20,100"), "fp-a");
        let second = run(&state, &record_with_path("10,10,0|20,20,100"), "fp-b");
        assert_eq!(second.lookup("_srv_replayDetected"), Some("1".to_string()));
        assert_eq!(second.lookup("_srv_replayMatchFP"), Some("fp-a".to_string()));
    }

    #[test]
    fn same_fingerprint_repeating_its_own_path_is_not_a_replay() {
        let state = PipelineState::new(500, None);
        run(&state, &record_with_path("10,10,0|20,20,100"), "fp-a");
        let second = run(&state, &record_with_path("10,10,0|20,20,100"), "fp-a");
        assert_eq!(second.lookup("_srv_replayDetected"), Some("0".to_string()));
    }
}
