use chrono::NaiveDate;
use serde::Serialize;

use crate::analytics::{calculate_plan_analytics, calculate_risk_index, PlanAnalytics};
use crate::error::{PlanoraError, Result};
use crate::interfaces::providers::LlmProvider;
use crate::planning::{PlanStore, StudyPlan};

const ANALYST_SYSTEM_PROMPT: &str =
    "You are a strict but intelligent academic performance analyst.";
const FEEDBACK_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackReport {
    pub ai_feedback: String,
    pub risk_index: f64,
}

pub fn build_ai_context(
    plan: &StudyPlan,
    analytics: &PlanAnalytics,
    risk_index: f64,
) -> Result<String> {
    let structure = serde_json::to_string_pretty(&plan.plan_content)?;
    Ok(format!(
        r#"
You are Planora's Academic Intelligence Engine.

IMPORTANT RULES:
- Only analyze based on provided data.
- Do NOT invent syllabus topics.
- Do NOT assume extra performance data.
- Base all reasoning strictly on plan and analytics.

============================

STUDENT PLAN DATA:
- Exam Name: {exam_name}
- Subject: {subject}
- Exam Date: {exam_date}
- Study Hours Per Day: {hours}
- Level: {level}

PERFORMANCE ANALYTICS:
- Completion Rate: {completion_rate}%
- Total Completed Days: {completed_days}
- Missed Days: {missed_days}
- Consistency Score: {consistency_score}
- Plan Risk Index: {risk_index}/100

PLAN STRUCTURE (JSON):
{structure}

============================

Generate response in this structured format:

1. Performance Diagnosis
2. Risk Level Analysis
3. Tactical Improvement Plan (Realistic + Data-driven)
4. Strategic Adjustment Suggestion
5. Motivational Message grounded in current reality

Keep response concise but intelligent.
"#,
        exam_name = plan.exam_name,
        subject = plan.subject,
        exam_date = plan.exam_date,
        hours = plan.study_hours_per_day,
        level = plan.level,
        completion_rate = analytics.completion_rate,
        completed_days = analytics.completed_days,
        missed_days = analytics.missed_days,
        consistency_score = analytics.consistency_score,
    ))
}

pub async fn generate_ai_feedback(
    store: &PlanStore,
    llm: &dyn LlmProvider,
    plan: &StudyPlan,
    today: NaiveDate,
) -> Result<FeedbackReport> {
    let progress = store.list_progress(plan.id).await?;
    let analytics = calculate_plan_analytics(&progress, today).ok_or_else(|| {
        PlanoraError::Validation("No analytics data available".to_string())
    })?;
    let risk_index = calculate_risk_index(&analytics);

    let prompt = build_ai_context(plan, &analytics, risk_index)?;
    let ai_feedback = llm
        .generate_text(&prompt, ANALYST_SYSTEM_PROMPT, Some(FEEDBACK_TEMPERATURE))
        .await?;
    tracing::info!(plan_id = plan.id, risk_index, "Generated AI feedback");

    Ok(FeedbackReport {
        ai_feedback,
        risk_index,
    })
}
