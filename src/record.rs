use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The unit that flows Edge → Worker → Raw store (spec.md §3.1).
///
/// Immutable apart from `query_string`: enrichment steps append
/// `&_srv_key=value` and hand back a new value via `with_enrichment`. Never
/// mutate an existing browser-reported parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub received_at: DateTime<Utc>,
    pub company_id: String,
    pub pixel_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub referer: String,
    pub request_path: String,
    pub headers_json: String,
    pub query_string: String,
}

const MAX_HEADER_VALUE: usize = 2000;

impl TrackingRecord {
    pub fn new(
        company_id: String,
        pixel_id: String,
        ip_address: String,
        user_agent: String,
        referer: String,
        request_path: String,
        headers_json: String,
        query_string: String,
    ) -> Self {
        Self {
            received_at: Utc::now(),
            company_id,
            pixel_id,
            ip_address,
            user_agent: truncate(&user_agent, MAX_HEADER_VALUE),
            referer: truncate(&referer, MAX_HEADER_VALUE),
            request_path,
            headers_json,
            query_string,
        }
    }

    /// Return a new record whose carrier has `_srv_{key}={value}` appended.
    /// Never mutates `self`; never touches an existing parameter.
    pub fn with_enrichment(&self, key: &str, value: &str) -> Self {
        let mut qs = self.query_string.clone();
        if !qs.is_empty() {
            qs.push('&');
        }
        qs.push_str("_srv_");
        qs.push_str(key);
        qs.push('=');
        qs.push_str(&urlencoding::encode(value));
        Self {
            query_string: qs,
            ..self.clone()
        }
    }

    /// Look up a single carrier parameter by name. Returns `None` on absence;
    /// this is the sole parsing primitive used on the hot path (spec.md §9 —
    /// "a single-function lookupParam(qs, name)").
    pub fn lookup(&self, name: &str) -> Option<String> {
        lookup_param(&self.query_string, name)
    }
}

/// Look up a single URL-encoded query parameter by name without building a
/// full map. Kept off the request hot path per spec.md §9's design note —
/// the ETL is the only caller expected to parse broadly.
pub fn lookup_param(qs: &str, name: &str) -> Option<String> {
    for pair in qs.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        if key == name {
            let raw = parts.next().unwrap_or("");
            return urlencoding::decode(raw).ok().map(|c| c.into_owned());
        }
    }
    None
}

/// Typed, safe cast from a carrier parameter: returns `None` on absence or
/// cast failure rather than erroring (spec.md §3.3 — "any unparseable field
/// becomes NULL").
pub fn lookup_param_as<T: std::str::FromStr>(qs: &str, name: &str) -> Option<T> {
    lookup_param(qs, name).and_then(|v| v.parse::<T>().ok())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_param_finds_value() {
        assert_eq!(lookup_param("sw=1920&sh=1080", "sh"), Some("1080".to_string()));
    }

    #[test]
    fn lookup_param_missing_is_none() {
        assert_eq!(lookup_param("sw=1920", "tz"), None);
    }

    #[test]
    fn lookup_param_decodes_percent_encoding() {
        assert_eq!(
            lookup_param("email=alice%40example.com", "email"),
            Some("alice@example.com".to_string())
        );
    }

    #[test]
    fn with_enrichment_appends_only_srv_namespace() {
        let rec = TrackingRecord::new(
            "42".into(),
            "1".into(),
            "1.2.3.4".into(),
            "ua".into(),
            "".into(),
            "/42/1_SMART.GIF".into(),
            "{}".into(),
            "sw=1920".into(),
        );
        let enriched = rec.with_enrichment("ipType", "public");
        assert_eq!(enriched.query_string, "sw=1920&_srv_ipType=public");
        // original browser-reported parameter is bit-identical
        assert!(enriched.query_string.starts_with("sw=1920"));
        assert_eq!(rec.query_string, "sw=1920");
    }

    #[test]
    fn lookup_param_as_parses_typed() {
        assert_eq!(lookup_param_as::<u32>("cores=8", "cores"), Some(8));
        assert_eq!(lookup_param_as::<u32>("cores=abc", "cores"), None);
    }
}
