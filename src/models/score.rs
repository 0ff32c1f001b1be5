//! VisitorScore / CustomerSummary (spec.md §3.6).

use chrono::{DateTime, Utc};
use clickhouse::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct VisitorScore {
    pub visit_id: String,
    pub bot_score: f64,
    pub anomaly_score: f64,
    pub lead_score: f64,
    pub mouse_authenticity: f64,
    pub session_quality: f64,
    pub composite_quality: f64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodType {
    Daily,
    Weekly,
    Monthly,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Daily => "D",
            PeriodType::Weekly => "W",
            PeriodType::Monthly => "M",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct CustomerSummary {
    pub company_id: String,
    pub period_type: String,
    pub period_start: DateTime<Utc>,
    pub total_hits: u64,
    pub bot_hits: u64,
    pub human_hits: u64,
    pub unknown_hits: u64,
    pub avg_mouse_authenticity: f64,
    pub avg_session_quality: f64,
    pub avg_composite_quality: f64,
    pub unique_devices: u64,
    pub unique_ips: u64,
    pub matched_visitors: u64,
    pub dead_internet_index: f64,
    pub updated_at: DateTime<Utc>,
}

/// Mouse-authenticity sub-score (spec.md §4.7, bucketed additive formula).
pub fn mouse_authenticity(
    mouse_entropy: f64,
    timing_cv: f64,
    speed_cv: f64,
    move_count: u32,
    replay_detected: bool,
    scroll_contradiction: bool,
) -> f64 {
    let entropy_pts = if mouse_entropy >= 70.0 {
        30.0
    } else if mouse_entropy >= 40.0 {
        20.0
    } else if mouse_entropy >= 20.0 {
        10.0
    } else {
        5.0
    };
    let timing_pts = if timing_cv > 0.5 {
        20.0
    } else if timing_cv > 0.3 {
        15.0
    } else if timing_cv > 0.1 {
        10.0
    } else {
        0.0
    };
    let speed_pts_raw: f64 = if speed_cv > 0.5 {
        20.0
    } else if speed_cv > 0.3 {
        15.0
    } else if speed_cv > 0.1 {
        10.0
    } else {
        0.0
    };
    let speed_pts = speed_pts_raw.min(15.0);
    let move_pts = if move_count >= 100 {
        15.0
    } else if move_count >= 50 {
        10.0
    } else {
        5.0
    };
    let replay_pts = if !replay_detected { 10.0 } else { 0.0 };
    let scroll_pts = if !scroll_contradiction { 10.0 } else { 0.0 };

    let total: f64 = entropy_pts + timing_pts + speed_pts + move_pts + replay_pts + scroll_pts;
    total.min(100.0)
}

/// Composite quality: weighted blend of mouse authenticity, session quality,
/// and lead score, penalized by normalized bot score and contradiction count
/// (spec.md §4.7).
pub fn composite_quality(
    mouse_authenticity: f64,
    session_quality: f64,
    lead_score: f64,
    bot_score: f64,
    contradiction_count: u32,
) -> f64 {
    let positive = 0.35 * mouse_authenticity + 0.30 * session_quality + 0.35 * lead_score;
    let bot_penalty = bot_score.clamp(0.0, 100.0);
    let contradiction_penalty = (contradiction_count as f64 * 8.0).min(40.0);
    (positive - 0.5 * bot_penalty - contradiction_penalty).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mouse_authenticity_rewards_high_entropy_and_variance() {
        let score = mouse_authenticity(75.0, 0.6, 0.6, 150, false, false);
        assert_eq!(score, 100.0);
    }

    #[test]
    fn mouse_authenticity_penalizes_replay_and_scroll_contradiction() {
        let clean = mouse_authenticity(10.0, 0.0, 0.0, 10, false, false);
        let dirty = mouse_authenticity(10.0, 0.0, 0.0, 10, true, true);
        assert!(clean > dirty);
    }

    #[test]
    fn composite_quality_penalizes_bot_score_and_contradictions() {
        let clean = composite_quality(90.0, 90.0, 90.0, 0.0, 0);
        let bot_like = composite_quality(90.0, 90.0, 90.0, 95.0, 4);
        assert!(clean > bot_like);
        assert!(bot_like < 30.0);
    }
}
