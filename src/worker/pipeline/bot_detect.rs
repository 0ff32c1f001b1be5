//! Step 1: known-bot UA detection (spec.md §4.3.1). A representative pattern
//! set stands in for the spec's "~10k patterns" — the matching strategy
//! (compiled regex set, first match wins) is what's grounded, not the exact
//! corpus.

use crate::record::TrackingRecord;
use regex::RegexSet;
use std::sync::OnceLock;

struct BotPattern {
    regex: &'static str,
    name: &'static str,
}

const BOT_PATTERNS: &[BotPattern] = &[
    BotPattern { regex: r"(?i)googlebot", name: "Googlebot" },
    BotPattern { regex: r"(?i)bingbot", name: "Bingbot" },
    BotPattern { regex: r"(?i)duckduckbot", name: "DuckDuckBot" },
    BotPattern { regex: r"(?i)yandexbot", name: "YandexBot" },
    BotPattern { regex: r"(?i)baiduspider", name: "Baiduspider" },
    BotPattern { regex: r"(?i)facebookexternalhit", name: "FacebookExternalHit" },
    BotPattern { regex: r"(?i)slackbot", name: "Slackbot" },
    BotPattern { regex: r"(?i)twitterbot", name: "Twitterbot" },
    BotPattern { regex: r"(?i)applebot", name: "Applebot" },
    BotPattern { regex: r"(?i)ahrefsbot", name: "AhrefsBot" },
    BotPattern { regex: r"(?i)semrushbot", name: "SemrushBot" },
    BotPattern { regex: r"(?i)mj12bot", name: "MJ12bot" },
    BotPattern { regex: r"(?i)headlesschrome", name: "HeadlessChrome" },
    BotPattern { regex: r"(?i)phantomjs", name: "PhantomJS" },
    BotPattern { regex: r"(?i)python-requests|python-urllib", name: "PythonHttpClient" },
    BotPattern { regex: r"(?i)curl/|wget/", name: "CliHttpClient" },
    BotPattern { regex: r"(?i)scrapy", name: "Scrapy" },
    BotPattern { regex: r"(?i)\bbot\b|crawler|spider", name: "GenericBot" },
];

fn pattern_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(BOT_PATTERNS.iter().map(|p| p.regex)).expect("static bot patterns"))
}

/// `_srv_knownBot`, `_srv_botName`.
pub fn run(record: &TrackingRecord) -> TrackingRecord {
    let matches = pattern_set().matches(&record.user_agent);
    match matches.iter().next() {
        Some(idx) => record
            .with_enrichment("knownBot", "1")
            .with_enrichment("botName", BOT_PATTERNS[idx].name),
        None => record.with_enrichment("knownBot", "0"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_ua(ua: &str) -> TrackingRecord {
        TrackingRecord::new(
            "42".into(),
            "1".into(),
            "1.2.3.4".into(),
            ua.into(),
            "".into(),
            "/42/1_SMART.GIF".into(),
            "{}".into(),
            "".into(),
        )
    }

    #[test]
    fn detects_googlebot() {
        let rec = run(&record_with_ua(
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
        ));
        assert_eq!(rec.lookup("_srv_knownBot"), Some("1".to_string()));
        assert_eq!(rec.lookup("_srv_botName"), Some("Googlebot".to_string()));
    }

    #[test]
    fn ordinary_browser_ua_is_not_flagged() {
        let rec = run(&record_with_ua(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
        ));
        assert_eq!(rec.lookup("_srv_knownBot"), Some("0".to_string()));
    }
}
