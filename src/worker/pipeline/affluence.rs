//! Step 9: device affluence (spec.md §4.3.1). Looks the device's GPU up
//! against a small tiered reference set; combines with core/memory/screen
//! signals into a coarse LOW/MID/HIGH bucket.

use crate::record::{lookup_param_as, TrackingRecord};

const HIGH_TIER_GPUS: &[&str] = &["rtx 40", "rtx 30", "apple m3", "apple m2", "radeon rx 7"];
const MID_TIER_GPUS: &[&str] = &["rtx 20", "gtx 16", "apple m1", "radeon rx 5", "iris xe"];

fn gpu_tier(gpu: &str) -> &'static str {
    let lower = gpu.to_ascii_lowercase();
    if HIGH_TIER_GPUS.iter().any(|g| lower.contains(g)) {
        "HIGH"
    } else if MID_TIER_GPUS.iter().any(|g| lower.contains(g)) {
        "MID"
    } else {
        "LOW"
    }
}

/// `_srv_affluence` (LOW/MID/HIGH), `_srv_gpuTier`.
pub fn run(record: &TrackingRecord) -> TrackingRecord {
    let gpu = record.lookup("gpu").unwrap_or_default();
    let tier = gpu_tier(&gpu);

    let cores = lookup_param_as::<u32>(&record.query_string, "cores").unwrap_or(0);
    let mem_gb = lookup_param_as::<f64>(&record.query_string, "mem").unwrap_or(0.0);
    let screen_width = lookup_param_as::<u32>(&record.query_string, "sw").unwrap_or(0);

    let mut points = 0u32;
    points += match tier {
        "HIGH" => 3,
        "MID" => 2,
        _ => 0,
    };
    points += if cores >= 12 { 2 } else if cores >= 8 { 1 } else { 0 };
    points += if mem_gb >= 32.0 { 2 } else if mem_gb >= 16.0 { 1 } else { 0 };
    points += if screen_width >= 2560 { 1 } else { 0 };

    let affluence = if points >= 5 {
        "HIGH"
    } else if points >= 2 {
        "MID"
    } else {
        "LOW"
    };

    record
        .with_enrichment("affluence", affluence)
        .with_enrichment("gpuTier", tier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_end_gpu_and_hardware_yields_high_affluence() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(),
            "gpu=NVIDIA RTX 4090&cores=16&mem=64&sw=3840".into(),
        );
        let enriched = run(&record);
        assert_eq!(enriched.lookup("_srv_affluence"), Some("HIGH".to_string()));
        assert_eq!(enriched.lookup("_srv_gpuTier"), Some("HIGH".to_string()));
    }

    #[test]
    fn no_signals_defaults_to_low() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(), "".into(),
        );
        assert_eq!(run(&record).lookup("_srv_affluence"), Some("LOW".to_string()));
    }
}
