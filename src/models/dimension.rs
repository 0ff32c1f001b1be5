//! Device / IP / Visit / Match dimensional rows (spec.md §3.4).
//!
//! ClickHouse has no in-place `UPDATE`; dimension tables use
//! `ReplacingMergeTree(updated_at)` and upserts are modeled as inserting a
//! newer version of the row. Readers must query with `FINAL` or an
//! `argMax`-based aggregation to see the latest version — see `store.rs`'s
//! `MIGRATIONS` for the table DDL.

use chrono::{DateTime, Utc};
use clickhouse::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct Device {
    pub device_hash: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub hit_count: u64,
    pub affluence_tier: String,
    pub estimated_age_days: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct IpDimension {
    pub ip_address: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub asn: String,
    pub asn_org: String,
    pub is_datacenter: bool,
    pub last_refreshed: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct Visit {
    pub visit_id: String,
    pub source_id: u64,
    pub company_id: String,
    pub pixel_id: String,
    pub device_hash: String,
    pub ip_address: String,
    pub match_email: String,
    pub received_at: DateTime<Utc>,
}

pub const MATCH_TYPE_EMAIL: &str = "email";
pub const MATCH_TYPE_IP: &str = "ip";

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct Match {
    pub company_id: String,
    pub pixel_id: String,
    pub match_type: String,
    pub match_key: String,
    pub first_visit_id: String,
    pub latest_visit_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub hit_count: u64,
    pub individual_key: Option<String>,
    pub address_key: Option<String>,
    /// Set only once, on the NULL → resolved transition (spec.md §3.4).
    pub matched_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Match {
    /// Merge a newly-resolved source row into an existing Match, honoring the
    /// lifecycle invariants: `individual_key`/`address_key` are sticky
    /// (`COALESCE(existing, new)`), `matched_at` transitions NULL → now()
    /// exactly once.
    pub fn merge_existing(existing: &Match, source: &Match, now: DateTime<Utc>) -> Match {
        let individual_key = existing
            .individual_key
            .clone()
            .or_else(|| source.individual_key.clone());
        let address_key = existing
            .address_key
            .clone()
            .or_else(|| source.address_key.clone());
        let matched_at = match (existing.matched_at, individual_key.is_some()) {
            (Some(t), _) => Some(t),
            (None, true) => Some(now),
            (None, false) => None,
        };
        Match {
            company_id: existing.company_id.clone(),
            pixel_id: existing.pixel_id.clone(),
            match_type: existing.match_type.clone(),
            match_key: existing.match_key.clone(),
            first_visit_id: existing.first_visit_id.clone(),
            latest_visit_id: source.latest_visit_id.clone(),
            first_seen: existing.first_seen,
            last_seen: source.last_seen,
            hit_count: existing.hit_count + source.hit_count,
            individual_key,
            address_key,
            matched_at,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_match(key: Option<&str>, matched_at: Option<DateTime<Utc>>) -> Match {
        Match {
            company_id: "42".into(),
            pixel_id: "1".into(),
            match_type: MATCH_TYPE_EMAIL.into(),
            match_key: "alice@example.com".into(),
            first_visit_id: "v1".into(),
            latest_visit_id: "v1".into(),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            hit_count: 1,
            individual_key: key.map(String::from),
            address_key: None,
            matched_at,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn individual_key_never_reverts_to_null() {
        let existing = base_match(Some("IK-1"), Some(Utc::now()));
        let source = base_match(None, None);
        let merged = Match::merge_existing(&existing, &source, Utc::now());
        assert_eq!(merged.individual_key.as_deref(), Some("IK-1"));
    }

    #[test]
    fn matched_at_set_once_on_null_to_resolved_transition() {
        let existing = base_match(None, None);
        let source = base_match(Some("IK-2"), None);
        let t0 = Utc::now();
        let merged = Match::merge_existing(&existing, &source, t0);
        assert_eq!(merged.matched_at, Some(t0));

        // a subsequent merge must not move matched_at again
        let t1 = t0 + chrono::Duration::minutes(5);
        let merged2 = Match::merge_existing(&merged, &source, t1);
        assert_eq!(merged2.matched_at, Some(t0));
    }
}
