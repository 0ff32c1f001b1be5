//! Step 4: offline geo lookup (spec.md §4.3.1) against a preloaded
//! GeoLite2-format database, the way `Sparklytics`'s collector resolves
//! visitor geography without a network round trip.

use super::state::PipelineState;
use crate::record::TrackingRecord;
use std::net::IpAddr;

/// `_srv_mmCC`, `_srv_mmReg`, `_srv_mmCity`, `_srv_mmLat`, `_srv_mmLon`,
/// `_srv_mmASN`, `_srv_mmASNOrg`.
pub fn run(state: &PipelineState, record: &TrackingRecord) -> TrackingRecord {
    let Some(reader) = state.maxmind.as_ref() else {
        return record.clone();
    };
    let Ok(ip) = record.ip_address.parse::<IpAddr>() else {
        return record.clone();
    };

    let mut enriched = record.clone();
    if let Ok(Some(city)) = reader
        .lookup(ip)
        .and_then(|r| r.decode::<maxminddb::geoip2::City>())
    {
        if let Some(country) = city.country.iso_code {
            enriched = enriched.with_enrichment("mmCC", country);
        }
        if let Some(region) = city.subdivisions.first().and_then(|s| s.iso_code) {
            enriched = enriched.with_enrichment("mmReg", region);
        }
        if let Some(name) = city.city.names.english {
            enriched = enriched.with_enrichment("mmCity", name);
        }
        if let Some(lat) = city.location.latitude {
            enriched = enriched.with_enrichment("mmLat", &lat.to_string());
        }
        if let Some(lon) = city.location.longitude {
            enriched = enriched.with_enrichment("mmLon", &lon.to_string());
        }
    }
    if let Ok(Some(asn)) = reader
        .lookup(ip)
        .and_then(|r| r.decode::<maxminddb::geoip2::Asn>())
    {
        if let Some(number) = asn.autonomous_system_number {
            enriched = enriched.with_enrichment("mmASN", &number.to_string());
        }
        if let Some(org) = asn.autonomous_system_organization {
            enriched = enriched.with_enrichment("mmASNOrg", org);
        }
    }
    enriched
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_database_leaves_record_unchanged() {
        let state = PipelineState::new(500, None);
        let record = TrackingRecord::new(
            "42".into(),
            "1".into(),
            "8.8.8.8".into(),
            "ua".into(),
            "".into(),
            "/42/1_SMART.GIF".into(),
            "{}".into(),
            "".into(),
        );
        let enriched = run(&state, &record);
        assert_eq!(enriched.query_string, record.query_string);
    }
}
