//! Step 15: lead-quality composite (spec.md §4.3.1). A weighted positive-
//! signal sum over everything the first 14 steps established — residential
//! IP, a stable fingerprint, human-like mouse entropy, font richness, a
//! clean canvas read, timezone/geo agreement, session depth, and the
//! absence of bot/contradiction signals.

use crate::record::{lookup_param_as, TrackingRecord};

/// `_srv_leadScore` (0-100).
pub fn run(record: &TrackingRecord) -> TrackingRecord {
    let mut score = 0.0f64;

    let is_residential = !matches!(
        record.lookup("_srv_ipType").as_deref(),
        Some("cgnat") | Some("reserved") | Some("benchmark")
    ) && record.lookup("_srv_datacenter").as_deref() != Some("1");
    if is_residential {
        score += 20.0;
    }

    if record.lookup("_srv_fpAlert").as_deref() != Some("1") {
        score += 15.0;
    }

    let mouse_entropy = lookup_param_as::<f64>(&record.query_string, "mouseEntropy").unwrap_or(0.0);
    score += (mouse_entropy / 100.0 * 20.0).clamp(0.0, 20.0);

    let font_count = record
        .lookup("fonts")
        .map(|f| f.split(',').filter(|s| !s.is_empty()).count())
        .unwrap_or(0);
    score += (font_count as f64 / 2.0).clamp(0.0, 10.0);

    if record.lookup("canvasFP").map(|f| !f.is_empty()).unwrap_or(false) {
        score += 10.0;
    }

    let cultural_score = lookup_param_as::<f64>(&record.query_string, "_srv_culturalScore").unwrap_or(100.0);
    score += (cultural_score / 100.0 * 10.0).clamp(0.0, 10.0);

    let session_hit_num = lookup_param_as::<u32>(&record.query_string, "_srv_sessionHitNum").unwrap_or(1);
    score += (session_hit_num as f64).min(10.0);

    if record.lookup("_srv_knownBot").as_deref() != Some("1") {
        score += 10.0;
    }

    let contradiction_count = lookup_param_as::<u32>(&record.query_string, "_srv_contradictions").unwrap_or(0);
    score -= (contradiction_count as f64 * 5.0).min(25.0);

    record.with_enrichment("leadScore", &score.clamp(0.0, 100.0).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_residential_signals_score_highly() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(),
            "mouseEntropy=80&fonts=a,b,c,d&canvasFP=abc123&_srv_ipType=public&_srv_knownBot=0"
                .into(),
        );
        let score: f64 = run(&record).lookup("_srv_leadScore").unwrap().parse().unwrap();
        assert!(score > 60.0, "expected high lead score, got {score}");
    }

    #[test]
    fn known_bot_with_contradictions_scores_poorly() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(),
            "_srv_knownBot=1&_srv_contradictions=4&_srv_datacenter=1".into(),
        );
        let score: f64 = run(&record).lookup("_srv_leadScore").unwrap().parse().unwrap();
        assert!(score < 20.0, "expected low lead score, got {score}");
    }
}
