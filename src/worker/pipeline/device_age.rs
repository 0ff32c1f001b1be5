//! Step 12: device-age estimation (spec.md §4.3.1). Triangulates a rough
//! device vintage from GPU tier, OS version, and browser version — none of
//! which alone is reliable, but agreement across all three narrows the
//! estimate.

use crate::record::TrackingRecord;

fn os_vintage_years(os: &str, os_version: &str) -> Option<f64> {
    match os {
        "Windows" => match os_version {
            v if v.starts_with("11") => Some(1.0),
            v if v.starts_with("10") => Some(4.0),
            _ => Some(8.0),
        },
        "Mac OS X" | "macOS" => os_version
            .split('.')
            .next()
            .and_then(|major| major.parse::<u32>().ok())
            .map(|major| (14i64.saturating_sub(major as i64)).max(0) as f64 + 1.0),
        "Android" => os_version
            .split('.')
            .next()
            .and_then(|major| major.parse::<u32>().ok())
            .map(|major| (14i64.saturating_sub(major as i64)).max(0) as f64 + 0.5),
        _ => None,
    }
}

/// `_srv_deviceAge` (years, approximate), `_srv_deviceAgeAnomaly`.
pub fn run(record: &TrackingRecord) -> TrackingRecord {
    let os = record.lookup("_srv_os").unwrap_or_default();
    let os_version = record.lookup("_srv_osVer").unwrap_or_default();
    let gpu_tier = record.lookup("_srv_gpuTier").unwrap_or_default();

    let Some(os_age) = os_vintage_years(&os, &os_version) else {
        return record.clone();
    };

    let gpu_age_hint = match gpu_tier.as_str() {
        "HIGH" => 0.0,
        "MID" => 2.0,
        _ => 4.0,
    };

    let estimated = (os_age + gpu_age_hint) / 2.0;
    // A brand-new OS paired with clearly dated GPU hardware (or the reverse)
    // is the anomaly worth flagging — real devices drift together.
    let anomaly = (os_age - gpu_age_hint).abs() > 2.5;

    record
        .with_enrichment("deviceAge", &format!("{estimated:.1}"))
        .with_enrichment("deviceAgeAnomaly", if anomaly { "1" } else { "0" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_os_with_old_gpu_is_an_anomaly() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(),
            "_srv_os=Windows&_srv_osVer=11&_srv_gpuTier=LOW".into(),
        );
        assert_eq!(run(&record).lookup("_srv_deviceAgeAnomaly"), Some("1".to_string()));
    }

    #[test]
    fn consistent_signals_do_not_anomaly() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(),
            "_srv_os=Windows&_srv_osVer=11&_srv_gpuTier=HIGH".into(),
        );
        assert_eq!(run(&record).lookup("_srv_deviceAgeAnomaly"), Some("0".to_string()));
    }
}
