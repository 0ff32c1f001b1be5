//! Step 7: session stitching (spec.md §4.3.1). In-memory map keyed by
//! DeviceHash; a session closes after 30 minutes of inactivity. The map is
//! the worker's own (single-consumer, no sharding needed — contrast with the
//! Edge's sharded trackers which see concurrent writers).

use super::state::{PipelineState, SessionState};
use crate::record::TrackingRecord;
use chrono::{Duration, Utc};

const SESSION_TIMEOUT: Duration = Duration::minutes(30);

/// `_srv_sessionId`, `_srv_sessionHitNum`, `_srv_sessionDurationSec`,
/// `_srv_sessionPages`.
pub fn run(state: &PipelineState, record: &TrackingRecord, device_hash: &str) -> TrackingRecord {
    let now = Utc::now();
    let mut sessions = state.sessions.lock().unwrap();

    let needs_new = match sessions.get(device_hash) {
        Some(s) => now - s.last_hit_at > SESSION_TIMEOUT,
        None => true,
    };
    if needs_new {
        sessions.insert(
            device_hash.to_string(),
            SessionState {
                session_id: uuid::Uuid::new_v4().to_string(),
                started_at: now,
                last_hit_at: now,
                hit_num: 0,
                pages: Vec::new(),
            },
        );
    }

    let session = sessions.get_mut(device_hash).unwrap();
    session.hit_num += 1;
    session.last_hit_at = now;
    if session.pages.last().map(|p| p.as_str()) != Some(record.request_path.as_str()) {
        session.pages.push(record.request_path.clone());
    }

    let duration_sec = (now - session.started_at).num_seconds().max(0);
    record
        .with_enrichment("sessionId", &session.session_id)
        .with_enrichment("sessionHitNum", &session.hit_num.to_string())
        .with_enrichment("sessionDurationSec", &duration_sec.to_string())
        .with_enrichment("sessionPages", &session.pages.len().to_string())
}

/// Evict sessions idle past the timeout. Run from a periodic sweeper the way
/// the Edge's fast enrichers prune their own trackers.
pub fn prune_expired(state: &PipelineState) {
    let now = Utc::now();
    let mut sessions = state.sessions.lock().unwrap();
    sessions.retain(|_, s| now - s.last_hit_at <= SESSION_TIMEOUT);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TrackingRecord {
        TrackingRecord::new(
            "42".into(),
            "1".into(),
            "1.2.3.4".into(),
            "ua".into(),
            "".into(),
            "/42/1_SMART.GIF".into(),
            "{}".into(),
            "".into(),
        )
    }

    #[test]
    fn consecutive_hits_from_the_same_device_share_a_session() {
        let state = PipelineState::new(500, None);
        let first = run(&state, &record(), "device-a");
        let second = run(&state, &record(), "device-a");
        assert_eq!(
            first.lookup("_srv_sessionId"),
            second.lookup("_srv_sessionId")
        );
        assert_eq!(second.lookup("_srv_sessionHitNum"), Some("2".to_string()));
    }

    #[test]
    fn different_devices_get_distinct_sessions() {
        let state = PipelineState::new(500, None);
        let a = run(&state, &record(), "device-a");
        let b = run(&state, &record(), "device-b");
        assert_ne!(a.lookup("_srv_sessionId"), b.lookup("_srv_sessionId"));
    }
}
