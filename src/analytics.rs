use chrono::NaiveDate;
use serde::Serialize;

use crate::planning::PlanProgress;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanAnalytics {
    pub total_days: usize,
    pub completed_days: usize,
    pub completion_rate: f64,
    pub average_percentage: i64,
    pub missed_days: usize,
    pub consistency_score: i64,
}

/// Aggregates per-day progress. Returns `None` for a plan without progress rows.
pub fn calculate_plan_analytics(
    progress: &[PlanProgress],
    today: NaiveDate,
) -> Option<PlanAnalytics> {
    if progress.is_empty() {
        return None;
    }

    let total_days = progress.len();
    let completed_days = progress.iter().filter(|entry| entry.completed).count();
    let missed_days = progress
        .iter()
        .filter(|entry| !entry.completed && entry.date < today)
        .count();

    let percentage_sum: i64 = progress
        .iter()
        .map(|entry| i64::from(entry.completion_percentage))
        .sum();
    let average_percentage = percentage_sum.div_euclid(total_days as i64);

    let completion_rate = completed_days as f64 / total_days as f64 * 100.0;
    let consistency_score = (average_percentage as f64 * 0.6 + completion_rate * 0.4) as i64;

    Some(PlanAnalytics {
        total_days,
        completed_days,
        completion_rate: round2(completion_rate),
        average_percentage,
        missed_days,
        consistency_score,
    })
}

/// Risk score out of 100; higher means the plan is more likely to slip.
pub fn calculate_risk_index(analytics: &PlanAnalytics) -> f64 {
    let score = 100.0
        - analytics.completion_rate * 0.5
        - analytics.consistency_score as f64 * 0.3
        - analytics.missed_days as f64 * 2.0;
    round2(score.clamp(0.0, 100.0))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
