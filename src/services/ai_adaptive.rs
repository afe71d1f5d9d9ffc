use chrono::{Duration, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::analytics::{calculate_plan_analytics, calculate_risk_index, PlanAnalytics};
use crate::error::{PlanoraError, Result};
use crate::interfaces::providers::LlmProvider;
use crate::planning::{PlanDay, PlanRewrite, PlanStore, StudyPlan, STATUS_AI_ADJUSTED_PARTIAL};

const RESTRUCTURING_SYSTEM_PROMPT: &str = "You are a strict academic restructuring engine.";
const RESTRUCTURING_TEMPERATURE: f32 = 0.2;
pub const WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AiAdaptationOutcome {
    Adapted { message: String, risk_index: f64 },
    NothingToAdapt { message: String },
}

/// Plan content split around `today`: everything before it, the next
/// `WINDOW_DAYS` days, and whatever lies after the window.
#[derive(Debug, Default, PartialEq)]
pub struct PlanPartition {
    pub past: Vec<PlanDay>,
    pub window: Vec<PlanDay>,
    pub future: Vec<PlanDay>,
}

pub fn partition_plan(content: &[PlanDay], today: NaiveDate) -> PlanPartition {
    let window_end = today + Duration::days(WINDOW_DAYS);
    let mut partition = PlanPartition::default();
    for day in content {
        let bucket = if day.date < today {
            &mut partition.past
        } else if day.date < window_end {
            &mut partition.window
        } else {
            &mut partition.future
        };
        bucket.push(day.clone());
    }
    partition
}

pub fn build_partial_adaptive_prompt(
    plan: &StudyPlan,
    analytics: &PlanAnalytics,
    risk_index: f64,
    window: &[PlanDay],
) -> Result<String> {
    let days = serde_json::to_string_pretty(window)?;
    Ok(format!(
        r#"
You are Planora Professional Adaptive Engine.

STRICT RULES:
- Return ONLY valid JSON.
- Do NOT explain anything.
- Do NOT use markdown.
- Only restructure provided days.
- Keep dates unchanged.
- Do NOT invent new subjects.

FORMAT:
[
  {{
    "date": "YYYY-MM-DD",
    "tasks": ["task1", "task2"]
  }}
]

========================

Subject: {subject}
Exam Date: {exam_date}
Study Hours Per Day: {hours}
Level: {level}

Analytics:
Completion Rate: {completion_rate}
Missed Days: {missed_days}
Consistency Score: {consistency_score}
Risk Index: {risk_index}

Restructure ONLY these upcoming 7 days:

{days}
"#,
        subject = plan.subject,
        exam_date = plan.exam_date,
        hours = plan.study_hours_per_day,
        level = plan.level,
        completion_rate = analytics.completion_rate,
        missed_days = analytics.missed_days,
        consistency_score = analytics.consistency_score,
    ))
}

pub fn strip_code_fences(raw: &str) -> String {
    raw.trim()
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Parses the model's reply into plan days. The returned dates must be exactly
/// the dates that were sent, each appearing once; the result is in date order.
pub fn parse_ai_days(raw: &str, window: &[PlanDay]) -> Result<Vec<PlanDay>> {
    let cleaned = strip_code_fences(raw);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| PlanoraError::Http(format!("AI response was not valid JSON: {e}")))?;
    if !value.is_array() {
        return Err(PlanoraError::Http("Invalid AI response format".to_string()));
    }
    let mut days: Vec<PlanDay> = serde_json::from_value(value)
        .map_err(|_| PlanoraError::Http("Invalid AI response format".to_string()))?;

    if let Some(stray) = days
        .iter()
        .find(|day| !window.iter().any(|w| w.date == day.date))
    {
        return Err(PlanoraError::Http(format!(
            "AI response moved a task to {}, outside the adapted window",
            stray.date
        )));
    }

    days.sort_by_key(|day| day.date);
    if let Some(pair) = days.windows(2).find(|pair| pair[0].date == pair[1].date) {
        return Err(PlanoraError::Http(format!(
            "AI response repeated {}",
            pair[0].date
        )));
    }
    if let Some(missing) = window
        .iter()
        .find(|w| days.binary_search_by_key(&w.date, |day| day.date).is_err())
    {
        return Err(PlanoraError::Http(format!(
            "AI response dropped {} from the adapted window",
            missing.date
        )));
    }
    Ok(days)
}

/// Lets the model restructure the next seven days of a plan, leaving the rest
/// of the schedule and its progress alone.
pub async fn adapt_study_plan_with_ai(
    store: &PlanStore,
    llm: &dyn LlmProvider,
    plan: &StudyPlan,
    today: NaiveDate,
) -> Result<AiAdaptationOutcome> {
    let progress = store.list_progress(plan.id).await?;
    let analytics = calculate_plan_analytics(&progress, today)
        .ok_or_else(|| PlanoraError::Validation("No analytics available".to_string()))?;
    let risk_index = calculate_risk_index(&analytics);

    let PlanPartition {
        past,
        window,
        future,
    } = partition_plan(&plan.plan_content, today);
    if window.is_empty() {
        return Ok(AiAdaptationOutcome::NothingToAdapt {
            message: "No upcoming days to adapt".to_string(),
        });
    }

    let prompt = build_partial_adaptive_prompt(plan, &analytics, risk_index, &window)?;
    let reply = llm
        .generate_text(
            &prompt,
            RESTRUCTURING_SYSTEM_PROMPT,
            Some(RESTRUCTURING_TEMPERATURE),
        )
        .await?;
    let new_window = parse_ai_days(&reply, &window).inspect_err(|err| {
        warn!(plan_id = plan.id, "Rejected AI restructuring: {err}");
    })?;

    let mut content = past;
    content.extend(new_window.iter().cloned());
    content.extend(future);

    store
        .apply_rewrite(
            plan.id,
            &PlanRewrite {
                plan_content: content,
                rewritten_days: new_window,
                study_hours_per_day: None,
                status: STATUS_AI_ADJUSTED_PARTIAL.to_string(),
                reset_from: today,
                reset_until: Some(today + Duration::days(WINDOW_DAYS)),
            },
        )
        .await?;

    info!(plan_id = plan.id, risk_index, "Applied partial AI adaptation");
    Ok(AiAdaptationOutcome::Adapted {
        message: "Partial AI adaptation successful".to_string(),
        risk_index,
    })
}
