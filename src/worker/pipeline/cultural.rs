//! Step 11: cultural arbitrage (spec.md §4.3.1). Starts at 100 and subtracts
//! per-mismatch weights when locale/timezone/font/voice signals disagree
//! with the geo-resolved country — a classic "claims to be from X but every
//! environmental signal says Y" fraud tell.

use crate::record::TrackingRecord;

const TZ_WEIGHT: i32 = 30;
const LANG_WEIGHT: i32 = 25;
const FONTS_WEIGHT: i32 = 20;
const NUM_FMT_WEIGHT: i32 = 15;
const VOICES_WEIGHT: i32 = 10;

fn country_timezones(country: &str) -> &'static [&'static str] {
    match country {
        "US" => &["America/"],
        "GB" => &["Europe/London"],
        "DE" => &["Europe/Berlin"],
        "FR" => &["Europe/Paris"],
        "JP" => &["Asia/Tokyo"],
        "IN" => &["Asia/Kolkata", "Asia/Calcutta"],
        "BR" => &["America/Sao_Paulo", "America/Bahia", "America/Fortaleza"],
        "AU" => &["Australia/"],
        _ => &[],
    }
}

fn country_languages(country: &str) -> &'static [&'static str] {
    match country {
        "US" | "GB" | "AU" => &["en"],
        "DE" => &["de"],
        "FR" => &["fr"],
        "JP" => &["ja"],
        "BR" => &["pt"],
        _ => &[],
    }
}

/// `_srv_culturalScore` (0-100), `_srv_culturalFlags`.
pub fn run(record: &TrackingRecord) -> TrackingRecord {
    let country = record.lookup("_srv_mmCC").or_else(|| record.lookup("_srv_ipapiCC"));
    let Some(country) = country else {
        return record.with_enrichment("culturalScore", "100").with_enrichment("culturalFlags", "");
    };

    let mut score = 100i32;
    let mut flags = Vec::new();

    let expected_tzs = country_timezones(&country);
    if !expected_tzs.is_empty() {
        if let Some(tz) = record.lookup("tz") {
            if !expected_tzs.iter().any(|prefix| tz.starts_with(prefix)) {
                score -= TZ_WEIGHT;
                flags.push("tz-mismatch");
            }
        }
    }

    let expected_langs = country_languages(&country);
    if !expected_langs.is_empty() {
        if let Some(lang) = record.lookup("lang") {
            let lang_prefix = lang.split(['-', '_']).next().unwrap_or("").to_ascii_lowercase();
            if !expected_langs.contains(&lang_prefix.as_str()) {
                score -= LANG_WEIGHT;
                flags.push("lang-mismatch");
            }
        }
    }

    if let Some(fonts) = record.lookup("fonts") {
        if country != "US" && fonts.to_ascii_lowercase().contains("ms mincho") {
            score -= FONTS_WEIGHT;
            flags.push("fonts-mismatch");
        }
    }

    if record.lookup("numFmt").as_deref() == Some("comma-decimal") && country == "US" {
        score -= NUM_FMT_WEIGHT;
        flags.push("numfmt-mismatch");
    }

    if record.lookup("voices").map(|v| v.is_empty()).unwrap_or(false) {
        score -= VOICES_WEIGHT;
        flags.push("no-voices");
    }

    record
        .with_enrichment("culturalScore", &score.max(0).to_string())
        .with_enrichment("culturalFlags", &flags.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_signals_keep_a_perfect_score() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(),
            "tz=America/New_York&lang=en-US&_srv_mmCC=US".into(),
        );
        assert_eq!(run(&record).lookup("_srv_culturalScore"), Some("100".to_string()));
    }

    #[test]
    fn mismatched_timezone_and_language_subtract_weights() {
        let record = TrackingRecord::new(
            "42".into(), "1".into(), "1.2.3.4".into(), "ua".into(), "".into(),
            "/42/1_SMART.GIF".into(), "{}".into(),
            "tz=Asia/Tokyo&lang=ja-JP&_srv_mmCC=US".into(),
        );
        let enriched = run(&record);
        assert_eq!(enriched.lookup("_srv_culturalScore"), Some("45".to_string()));
    }
}
