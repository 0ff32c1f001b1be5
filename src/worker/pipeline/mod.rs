//! The 15-step enrichment pipeline (spec.md §4.3.1), run in order against
//! each record pulled off the enrichment channel. Each step is isolated in
//! its own file; a step's panic-free failure just means the record carries
//! no `_srv_*` fields for that step (spec.md's per-record error policy).

pub mod affluence;
pub mod bot_detect;
pub mod contradictions;
pub mod cross_customer;
pub mod cultural;
pub mod dead_internet;
pub mod device_age;
pub mod geo_external;
pub mod geo_offline;
pub mod lead_score;
pub mod replay;
pub mod reverse_dns;
pub mod session;
pub mod state;
pub mod ua_parse;
pub mod whois;

use crate::record::TrackingRecord;
use state::PipelineState;
use std::net::IpAddr;

const DEFAULT_DNS_RESOLVER: &str = "1.1.1.1";

/// Compute `DeviceHash = SHA-256(CanvasFP ∥ AudioFP ∥ WebGLFP ∥ FontList ∥
/// ScreenRes)` (spec.md §3.4). Pure function of the carrier; used both by the
/// pipeline's stateful steps (7, 8, 13) and by the ETL's Phase 9.
pub fn device_hash(record: &TrackingRecord) -> String {
    use sha2::{Digest, Sha256};
    let canvas = record.lookup("canvasFP").unwrap_or_default();
    let audio = record.lookup("audioFP").unwrap_or_default();
    let webgl = record.lookup("webglFP").unwrap_or_default();
    let fonts = record.lookup("fonts").unwrap_or_default();
    let sw = record.lookup("sw").unwrap_or_default();
    let sh = record.lookup("sh").unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(canvas.as_bytes());
    hasher.update(audio.as_bytes());
    hasher.update(webgl.as_bytes());
    hasher.update(fonts.as_bytes());
    hasher.update(format!("{sw}x{sh}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Apply all 15 steps in spec.md's table order. Never aborts: each step
/// either enriches or (on internal failure) leaves the record unchanged for
/// its own `_srv_*` fields.
pub async fn run_all(state: &PipelineState, record: TrackingRecord) -> TrackingRecord {
    let record = bot_detect::run(&record);
    let record = ua_parse::run(&record);

    let resolver: IpAddr = DEFAULT_DNS_RESOLVER.parse().expect("static resolver address");
    let record = reverse_dns::run(&record, resolver).await;

    let record = geo_offline::run(state, &record);
    let record = geo_external::run(state, &record).await;
    let record = whois::run(&record).await;

    let hash = device_hash(&record);
    let fingerprint = record.lookup("canvasFP").unwrap_or_default();

    let record = session::run(state, &record, &hash);
    let record = cross_customer::run(state, &record, &hash);
    let record = affluence::run(&record);
    let record = contradictions::run(&record);
    let record = cultural::run(&record);
    let record = device_age::run(&record);
    let record = replay::run(state, &record, &fingerprint);
    let record = dead_internet::run(state, &record);
    lead_score::run(&record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_hash_is_pure_and_deterministic() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(),
            "canvasFP=c1&audioFP=a1&webglFP=w1&fonts=Arial,Helvetica&sw=1920&sh=1080".into(),
        );
        let first = device_hash(&record);
        let second = device_hash(&record);
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn device_hash_changes_with_any_fingerprint_component() {
        let base = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(),
            "canvasFP=c1&audioFP=a1&webglFP=w1&fonts=Arial&sw=1920&sh=1080".into(),
        );
        let changed = base.with_enrichment("_unused", "_unused"); // query string differs only by srv field
        // a _srv_ field must never influence DeviceHash
        assert_eq!(device_hash(&base), device_hash(&changed));

        let different_canvas = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(),
            "canvasFP=c2&audioFP=a1&webglFP=w1&fonts=Arial&sw=1920&sh=1080".into(),
        );
        assert_ne!(device_hash(&base), device_hash(&different_canvas));
    }
}
