//! Step 2: UA parsing (spec.md §4.3.1). Deterministic, delegates to
//! `woothee`'s table-driven parser the way `Sparklytics`'s collector uses it
//! for the same UA → browser/os/device decomposition.

use crate::record::TrackingRecord;

/// `_srv_browser`, `_srv_browserVer`, `_srv_os`, `_srv_osVer`,
/// `_srv_deviceType`, `_srv_deviceModel`, `_srv_deviceBrand`.
pub fn run(record: &TrackingRecord) -> TrackingRecord {
    let Some(parsed) = woothee::parser::Parser::new().parse(&record.user_agent) else {
        return record
            .with_enrichment("browser", "unknown")
            .with_enrichment("os", "unknown")
            .with_enrichment("deviceType", "unknown");
    };

    let device_type = match parsed.category {
        "smartphone" => "mobile",
        "mobilephone" => "mobile",
        "crawler" => "bot",
        "misc" => "other",
        _ => "desktop",
    };

    record
        .with_enrichment("browser", parsed.name)
        .with_enrichment("browserVer", parsed.version)
        .with_enrichment("os", parsed.os)
        .with_enrichment("osVer", parsed.os_version.as_ref())
        .with_enrichment("deviceType", device_type)
        .with_enrichment("deviceModel", parsed.os_version.as_ref())
        .with_enrichment("deviceBrand", parsed.vendor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_common_desktop_chrome_ua() {
        let record = TrackingRecord::new(
            "42".into(),
            "1".into(),
            "1.2.3.4".into(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/120.0.0.0 Safari/537.36"
                .into(),
            "".into(),
            "/42/1_SMART.GIF".into(),
            "{}".into(),
            "".into(),
        );
        let enriched = run(&record);
        assert_eq!(enriched.lookup("_srv_browser"), Some("Chrome".to_string()));
        assert_eq!(enriched.lookup("_srv_deviceType"), Some("desktop".to_string()));
    }
}
