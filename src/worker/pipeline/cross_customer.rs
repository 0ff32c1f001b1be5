//! Step 8: cross-customer intelligence (spec.md §4.3.1). Sliding 5-minute
//! window per (IP, fingerprint); alerts when 3+ distinct customers show up
//! for the same pair — the signature signal of a scraped or shared
//! fingerprinting library crossing tenant boundaries.

use super::state::{CrossCustomerEntry, PipelineState};
use crate::record::TrackingRecord;
use chrono::{Duration, Utc};
use std::collections::HashSet;

const WINDOW: Duration = Duration::minutes(5);
const ALERT_THRESHOLD: usize = 3;

/// `_srv_crossCustHits`, `_srv_crossCustWindow`, `_srv_crossCustAlert`.
pub fn run(state: &PipelineState, record: &TrackingRecord, device_hash: &str) -> TrackingRecord {
    let key = format!("{}|{}", record.ip_address, device_hash);
    let now = Utc::now();

    let mut map = state.cross_customer.lock().unwrap();
    let entry = map.entry(key).or_insert_with(|| CrossCustomerEntry { seen: Vec::new() });
    entry.seen.retain(|(t, _)| now - *t <= WINDOW);
    entry.seen.push((now, record.company_id.clone()));

    let distinct_customers: HashSet<&str> = entry.seen.iter().map(|(_, c)| c.as_str()).collect();
    let hits = entry.seen.len();
    let alert = distinct_customers.len() >= ALERT_THRESHOLD;

    record
        .with_enrichment("crossCustHits", &hits.to_string())
        .with_enrichment("crossCustWindow", &WINDOW.num_seconds().to_string())
        .with_enrichment("crossCustAlert", if alert { "1" } else { "0" })
}

pub fn prune_expired(state: &PipelineState) {
    let now = Utc::now();
    let mut map = state.cross_customer.lock().unwrap();
    map.retain(|_, entry| {
        entry.seen.retain(|(t, _)| now - *t <= WINDOW);
        !entry.seen.is_empty()
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_for(company: &str) -> TrackingRecord {
        TrackingRecord::new(
            company.into(),
            "1".into(),
            "1.2.3.4".into(),
            "ua".into(),
            "".into(),
            "/1/1_SMART.GIF".into(),
            "{}".into(),
            "".into(),
        )
    }

    #[test]
    fn alerts_at_three_distinct_customers_for_one_fingerprint() {
        let state = PipelineState::new(500, None);
        run(&state, &record_for("c1"), "fp-shared");
        run(&state, &record_for("c2"), "fp-shared");
        let third = run(&state, &record_for("c3"), "fp-shared");
        assert_eq!(third.lookup("_srv_crossCustAlert"), Some("1".to_string()));
    }

    #[test]
    fn single_customer_repeats_do_not_alert() {
        let state = PipelineState::new(500, None);
        run(&state, &record_for("c1"), "fp-solo");
        let second = run(&state, &record_for("c1"), "fp-solo");
        assert_eq!(second.lookup("_srv_crossCustAlert"), Some("0".to_string()));
    }
}
