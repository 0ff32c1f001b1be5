//! Step 10: contradiction matrix (spec.md §4.3.1). Fourteen cross-signal
//! rules, each tiered IMPOSSIBLE or SUSPICIOUS — the full rule set spec.md
//! names, including the eight "mixed"-severity rules it lists by name only.

use crate::record::{lookup_param_as, TrackingRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Impossible,
    Suspicious,
}

impl Severity {
    fn as_str(&self) -> &'static str {
        match self {
            Severity::Impossible => "IMPOSSIBLE",
            Severity::Suspicious => "SUSPICIOUS",
        }
    }
}

struct Rule {
    name: &'static str,
    severity: Severity,
    check: fn(&TrackingRecord) -> bool,
}

fn is_mobile_ua(record: &TrackingRecord) -> bool {
    record.lookup("_srv_deviceType").as_deref() == Some("mobile")
}

fn is_desktop_ua(record: &TrackingRecord) -> bool {
    record.lookup("_srv_deviceType").as_deref() == Some("desktop")
}

fn screen_width(record: &TrackingRecord) -> u32 {
    lookup_param_as::<u32>(&record.query_string, "sw").unwrap_or(0)
}

fn platform(record: &TrackingRecord) -> String {
    record.lookup("plt").unwrap_or_default().to_ascii_lowercase()
}

fn gpu(record: &TrackingRecord) -> String {
    record.lookup("gpu").unwrap_or_default().to_ascii_lowercase()
}

fn ua_contains(record: &TrackingRecord, needle: &str) -> bool {
    record.user_agent.to_ascii_lowercase().contains(needle)
}

const RULES: &[Rule] = &[
    Rule {
        name: "mobile-ua-wide-screen-with-mouse",
        severity: Severity::Impossible,
        check: |r| {
            is_mobile_ua(r)
                && screen_width(r) >= 1920
                && lookup_param_as::<f64>(&r.query_string, "mouseEntropy").unwrap_or(0.0) > 0.0
        },
    },
    Rule {
        name: "macos-directx-gpu",
        severity: Severity::Impossible,
        check: |r| {
            platform(r).contains("mac")
                && r.lookup("gpu").map(|g| {
                    let g = g.to_ascii_lowercase();
                    g.contains("directx") || g.contains("d3d")
                }).unwrap_or(false)
        },
    },
    Rule {
        name: "safari-macos-battery-api",
        severity: Severity::Impossible,
        check: |r| {
            platform(r).contains("mac")
                && r.lookup("_srv_browser").as_deref() == Some("Safari")
                && r.lookup("batteryApi").as_deref() == Some("1")
        },
    },
    Rule {
        name: "touch-points-without-touch-support",
        severity: Severity::Impossible,
        check: |r| {
            lookup_param_as::<u32>(&r.query_string, "maxTouchPoints").unwrap_or(0) > 0
                && r.lookup("touch").as_deref() == Some("0")
        },
    },
    Rule {
        name: "desktop-ua-narrow-screen",
        severity: Severity::Suspicious,
        check: |r| is_desktop_ua(r) && screen_width(r) > 0 && screen_width(r) < 600,
    },
    Rule {
        name: "linux-apple-font",
        severity: Severity::Impossible,
        check: |r| {
            platform(r).contains("linux")
                && r.lookup("fonts")
                    .map(|f| f.to_ascii_lowercase().contains("sf pro") || f.to_ascii_lowercase().contains("helvetica neue"))
                    .unwrap_or(false)
        },
    },
    Rule {
        name: "empty-languages",
        severity: Severity::Suspicious,
        check: |r| r.lookup("langs").map(|l| l.is_empty()).unwrap_or(true),
    },
    Rule {
        name: "uniform-timing",
        severity: Severity::Suspicious,
        check: |r| lookup_param_as::<f64>(&r.query_string, "moveTimingCV").unwrap_or(1.0) < 0.01,
    },
    Rule {
        name: "win-fonts-on-mac",
        severity: Severity::Impossible,
        check: |r| {
            platform(r).contains("mac")
                && r.lookup("fonts")
                    .map(|f| {
                        let f = f.to_ascii_lowercase();
                        f.contains("segoe ui") || f.contains("calibri") || f.contains("consolas")
                    })
                    .unwrap_or(false)
        },
    },
    Rule {
        name: "swiftshader-gpu",
        severity: Severity::Suspicious,
        check: |r| gpu(r).contains("swiftshader"),
    },
    Rule {
        name: "gpu-platform-mismatch",
        severity: Severity::Impossible,
        check: |r| {
            let gpu = gpu(r);
            let platform = platform(r);
            (gpu.contains("apple") && !platform.contains("mac") && !platform.contains("iphone"))
                || (gpu.contains("adreno") && !platform.contains("android") && !platform.contains("linux"))
        },
    },
    Rule {
        name: "ua-platform-mismatch",
        severity: Severity::Impossible,
        check: |r| {
            let platform = platform(r);
            (ua_contains(r, "windows") && platform.contains("mac"))
                || (ua_contains(r, "macintosh") && platform.contains("win"))
        },
    },
    Rule {
        name: "clienthints-platform-mismatch",
        severity: Severity::Impossible,
        check: |r| {
            let Some(ch_platform) = r.lookup("chPlatform") else {
                return false;
            };
            let ch_platform = ch_platform.to_ascii_lowercase();
            let platform = platform(r);
            !ch_platform.is_empty() && !platform.is_empty() && !ch_platform.contains(platform.as_str())
                && !platform.contains(ch_platform.as_str())
        },
    },
    Rule {
        name: "scroll-no-depth",
        severity: Severity::Suspicious,
        check: |r| {
            lookup_param_as::<u32>(&r.query_string, "scrollEvents").unwrap_or(0) > 0
                && lookup_param_as::<u32>(&r.query_string, "scrollDepth").unwrap_or(0) == 0
        },
    },
];

/// `_srv_contradictions` (count), `_srv_contradictionList`.
pub fn run(record: &TrackingRecord) -> TrackingRecord {
    let hits: Vec<&Rule> = RULES.iter().filter(|rule| (rule.check)(record)).collect();
    let list = hits
        .iter()
        .map(|r| format!("{}:{}", r.name, r.severity.as_str()))
        .collect::<Vec<_>>()
        .join(",");

    record
        .with_enrichment("contradictions", &hits.len().to_string())
        .with_enrichment("contradictionList", &list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_points_without_touch_support_is_flagged() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(), "maxTouchPoints=5&touch=0".into(),
        );
        let enriched = run(&record);
        assert_eq!(enriched.lookup("_srv_contradictions"), Some("1".to_string()));
        assert!(enriched
            .lookup("_srv_contradictionList")
            .unwrap()
            .contains("touch-points-without-touch-support"));
    }

    #[test]
    fn clean_record_has_zero_contradictions() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(), "langs=en-US&moveTimingCV=0.4".into(),
        );
        assert_eq!(run(&record).lookup("_srv_contradictions"), Some("0".to_string()));
    }

    #[test]
    fn swiftshader_gpu_is_flagged_suspicious() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(), "gpu=Google%20SwiftShader".into(),
        );
        let enriched = run(&record);
        assert_eq!(enriched.lookup("_srv_contradictions"), Some("1".to_string()));
        assert!(enriched
            .lookup("_srv_contradictionList")
            .unwrap()
            .contains("swiftshader-gpu:SUSPICIOUS"));
    }

    #[test]
    fn windows_fonts_on_mac_platform_is_impossible() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(), "plt=MacIntel&fonts=Calibri,Segoe%20UI".into(),
        );
        let enriched = run(&record);
        assert!(enriched
            .lookup("_srv_contradictionList")
            .unwrap()
            .contains("win-fonts-on-mac:IMPOSSIBLE"));
    }

    #[test]
    fn scroll_events_without_depth_is_suspicious() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(), "scrollEvents=12&scrollDepth=0".into(),
        );
        let enriched = run(&record);
        assert!(enriched
            .lookup("_srv_contradictionList")
            .unwrap()
            .contains("scroll-no-depth:SUSPICIOUS"));
    }
}
