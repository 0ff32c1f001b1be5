//! Step 5: external geo API (spec.md §4.3.1). Throttled by the shared
//! `PipelineState::geo_api_semaphore`; skipped entirely when the IP is
//! already present in the in-memory cache, the same "cache in front of a
//! rate-limited external call" shape `usage_tracker` uses in front of the
//! store.

use super::state::{IpGeoCacheEntry, PipelineState};
use crate::record::TrackingRecord;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::time::Duration as StdDuration;

const TIMEOUT: StdDuration = StdDuration::from_secs(1);
const CACHE_TTL: Duration = Duration::hours(24);

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    isp: Option<String>,
    proxy: Option<bool>,
    mobile: Option<bool>,
    #[serde(rename = "reverse")]
    reverse_hostname: Option<String>,
    #[serde(rename = "as")]
    asn: Option<String>,
}

/// `_srv_ipapiCC`, `_srv_ipapiISP`, `_srv_ipapiProxy`, `_srv_ipapiMobile`,
/// `_srv_ipapiReverse`, `_srv_ipapiASN`.
pub async fn run(state: &PipelineState, record: &TrackingRecord) -> TrackingRecord {
    {
        let cache = state.ip_geo_cache.lock().unwrap();
        if let Some(entry) = cache.get(&record.ip_address) {
            if Utc::now() - entry.cached_at < CACHE_TTL {
                return record.clone();
            }
        }
    }

    // `forget()` so the permit never returns to the pool on its own — the
    // per-minute refill task in `PipelineState::spawn_geo_rate_limit_refill`
    // is the sole source of new permits, which is what actually caps this at
    // requests-per-minute rather than concurrent-in-flight-requests.
    let Ok(permit) = state.geo_api_semaphore.try_acquire() else {
        return record.clone();
    };
    permit.forget();

    let url = format!(
        "http://ip-api.com/json/{}?fields=countryCode,isp,proxy,mobile,reverse,as",
        record.ip_address
    );
    let response = tokio::time::timeout(TIMEOUT, state.http.get(&url).send()).await;
    let Ok(Ok(response)) = response else {
        return record.clone();
    };
    let Ok(parsed) = response.json::<IpApiResponse>().await else {
        return record.clone();
    };

    {
        let mut cache = state.ip_geo_cache.lock().unwrap();
        cache.insert(
            record.ip_address.clone(),
            IpGeoCacheEntry {
                asn: parsed.asn.clone(),
                cached_at: Utc::now(),
            },
        );
    }

    let mut enriched = record.clone();
    if let Some(cc) = parsed.country_code {
        enriched = enriched.with_enrichment("ipapiCC", &cc);
    }
    if let Some(isp) = parsed.isp {
        enriched = enriched.with_enrichment("ipapiISP", &isp);
    }
    if let Some(proxy) = parsed.proxy {
        enriched = enriched.with_enrichment("ipapiProxy", if proxy { "1" } else { "0" });
    }
    if let Some(mobile) = parsed.mobile {
        enriched = enriched.with_enrichment("ipapiMobile", if mobile { "1" } else { "0" });
    }
    if let Some(reverse) = parsed.reverse_hostname {
        enriched = enriched.with_enrichment("ipapiReverse", &reverse);
    }
    if let Some(asn) = parsed.asn {
        enriched = enriched.with_enrichment("ipapiASN", &asn);
    }
    enriched
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cached_ip_skips_the_external_call() {
        let state = PipelineState::new(500, None);
        state.ip_geo_cache.lock().unwrap().insert(
            "9.9.9.9".to_string(),
            IpGeoCacheEntry {
                asn: Some("AS1".to_string()),
                cached_at: Utc::now(),
            },
        );
        let record = TrackingRecord::new(
            "42".into(),
            "1".into(),
            "9.9.9.9".into(),
            "ua".into(),
            "".into(),
            "/42/1_SMART.GIF".into(),
            "{}".into(),
            "".into(),
        );
        let enriched = run(&state, &record).await;
        assert_eq!(enriched.query_string, record.query_string);
    }
}
