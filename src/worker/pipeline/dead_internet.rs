//! Step 14: dead-internet index update (spec.md §4.3.1). A per-customer
//! running aggregate of bot-like-vs-total traffic, read back as one signal
//! feeding the lead-quality composite in step 15.

use super::state::{DeadInternetAggregate, PipelineState};
use crate::record::TrackingRecord;

/// `_srv_deadInternetIdx` (0-100).
pub fn run(state: &PipelineState, record: &TrackingRecord) -> TrackingRecord {
    let is_bot_like = record.lookup("_srv_knownBot").as_deref() == Some("1")
        || record.lookup("_srv_evasionDetected").as_deref() == Some("1")
        || lookup_bot_score(record) > 70.0;

    let mut map = state.dead_internet.lock().unwrap();
    let entry = map.entry(record.company_id.clone()).or_insert(DeadInternetAggregate::default());
    entry.total += 1;
    if is_bot_like {
        entry.bot_like += 1;
    }

    let index = if entry.total == 0 {
        0.0
    } else {
        (entry.bot_like as f64 / entry.total as f64) * 100.0
    };

    record.with_enrichment("deadInternetIdx", &format!("{index:.1}"))
}

fn lookup_bot_score(record: &TrackingRecord) -> f64 {
    crate::record::lookup_param_as::<f64>(&record.query_string, "botScore").unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_for(company: &str, bot_score: &str) -> TrackingRecord {
        TrackingRecord::new(
            company.into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/1/1_SMART.GIF".into(), "{}".into(), format!("botScore={bot_score}"),
        )
    }

    #[test]
    fn index_rises_with_bot_like_traffic_share() {
        let state = PipelineState::new(500, None);
        run(&state, &record_for("c1", "0"));
        run(&state, &record_for("c1", "0"));
        let third = run(&state, &record_for("c1", "90"));
        assert_eq!(third.lookup("_srv_deadInternetIdx"), Some("33.3".to_string()));
    }
}
