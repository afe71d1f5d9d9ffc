use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::analytics::{calculate_plan_analytics, PlanAnalytics};
use crate::error::Result;
use crate::planning::{
    generate_structured_plan, PlanDay, PlanRewrite, PlanStore, STATUS_ADJUSTED,
};

const MIN_COMPLETION_RATE: f64 = 40.0;
const MAX_MISSED_DAYS: usize = 3;
const MIN_CONSISTENCY_SCORE: i64 = 50;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AdaptationOutcome {
    Adapted {
        message: String,
        new_study_hours_per_day: i32,
    },
    Unchanged {
        message: String,
        analytics: PlanAnalytics,
    },
}

pub fn needs_adaptation(analytics: &PlanAnalytics) -> bool {
    analytics.completion_rate < MIN_COMPLETION_RATE
        || analytics.missed_days > MAX_MISSED_DAYS
        || analytics.consistency_score < MIN_CONSISTENCY_SCORE
}

/// Drops one study hour (never below one) and regenerates every day from
/// `today` on when the plan is slipping. Days already behind stay in the
/// content with their progress untouched.
pub async fn adapt_study_plan(
    store: &PlanStore,
    plan_id: i32,
    today: NaiveDate,
) -> Result<Option<AdaptationOutcome>> {
    let progress = store.list_progress(plan_id).await?;
    let Some(analytics) = calculate_plan_analytics(&progress, today) else {
        return Ok(None);
    };
    let Some(plan) = store.get_plan(plan_id).await? else {
        return Ok(None);
    };

    if !needs_adaptation(&analytics) {
        return Ok(Some(AdaptationOutcome::Unchanged {
            message: "No adaptation needed".to_string(),
            analytics,
        }));
    }

    let new_hours = (plan.study_hours_per_day - 1).max(1);
    let topics = super::plan_topics(&plan);
    let regenerated = generate_structured_plan(today, plan.exam_date, &topics, &plan.level);

    let mut content: Vec<PlanDay> = plan
        .plan_content
        .iter()
        .filter(|day| day.date < today)
        .cloned()
        .collect();
    content.extend(regenerated.iter().cloned());

    store
        .apply_rewrite(
            plan_id,
            &PlanRewrite {
                plan_content: content,
                rewritten_days: regenerated,
                study_hours_per_day: Some(new_hours),
                status: STATUS_ADJUSTED.to_string(),
                reset_from: today,
                reset_until: None,
            },
        )
        .await?;

    info!(
        plan_id,
        completion_rate = analytics.completion_rate,
        missed_days = analytics.missed_days,
        consistency_score = analytics.consistency_score,
        new_hours,
        "Adapted study plan"
    );
    Ok(Some(AdaptationOutcome::Adapted {
        message: "Plan adapted successfully".to_string(),
        new_study_hours_per_day: new_hours,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analytics(completion_rate: f64, missed_days: usize, consistency_score: i64) -> PlanAnalytics {
        PlanAnalytics {
            total_days: 10,
            completed_days: 0,
            completion_rate,
            average_percentage: 0,
            missed_days,
            consistency_score,
        }
    }

    #[test]
    fn any_single_threshold_triggers_adaptation() {
        assert!(needs_adaptation(&analytics(39.99, 0, 90)));
        assert!(needs_adaptation(&analytics(90.0, 4, 90)));
        assert!(needs_adaptation(&analytics(90.0, 0, 49)));
    }

    #[test]
    fn boundary_values_do_not_trigger() {
        assert!(!needs_adaptation(&analytics(40.0, 3, 50)));
    }

    #[test]
    fn outcome_serializes_without_variant_tag() {
        let value = serde_json::to_value(AdaptationOutcome::Adapted {
            message: "Plan adapted successfully".to_string(),
            new_study_hours_per_day: 2,
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "message": "Plan adapted successfully",
                "new_study_hours_per_day": 2
            })
        );
    }
}
