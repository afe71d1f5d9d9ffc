use chrono::{Duration, NaiveDate};

use super::PlanDay;

const MAX_REVISION_DAYS: i64 = 5;
const MOCK_TEST_EVERY: usize = 7;
const FALLBACK_TOPIC: &str = "General Review";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudyLevel {
    Beginner,
    Intermediate,
    Advanced,
    General,
}

impl StudyLevel {
    /// Unknown labels fall back to the general template.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "beginner" => StudyLevel::Beginner,
            "intermediate" => StudyLevel::Intermediate,
            "advanced" => StudyLevel::Advanced,
            _ => StudyLevel::General,
        }
    }

    fn tasks_for(self, topic: &str, day_index: usize) -> Vec<String> {
        match self {
            StudyLevel::Beginner => vec![
                format!("{topic} - Detailed Concept Study"),
                format!("{topic} - Guided Examples"),
                format!("{topic} - Basic Practice Problems"),
                "Short Revision of Previous Topic".to_string(),
            ],
            StudyLevel::Intermediate => vec![
                format!("{topic} - Concept Refresh"),
                format!("{topic} - Mixed Practice Questions"),
                format!("{topic} - Previous Year Questions"),
                "Quick Revision".to_string(),
            ],
            StudyLevel::Advanced => {
                let mut tasks = vec![
                    format!("{topic} - Rapid Concept Review"),
                    format!("{topic} - Hard Problems"),
                    format!("{topic} - Timed Practice Session"),
                    "Analyze Weak Areas".to_string(),
                ];
                if day_index % MOCK_TEST_EVERY == MOCK_TEST_EVERY - 1 {
                    tasks.push("Full-Length Mock Test".to_string());
                }
                tasks
            }
            StudyLevel::General => vec![
                format!("{topic} - Concept Study"),
                format!("{topic} - Practice Problems"),
                "Quick Revision".to_string(),
            ],
        }
    }
}

fn revision_tasks() -> Vec<String> {
    vec![
        "Full Syllabus Revision".to_string(),
        "Mock Test Practice".to_string(),
        "Analyze Weak Areas".to_string(),
    ]
}

/// Lays out one task list per day from `today` up to the day before the exam.
/// Topics rotate daily; the last quarter of the window (at most five days) is
/// reserved for full revision.
pub fn generate_structured_plan(
    today: NaiveDate,
    exam_date: NaiveDate,
    topics: &[String],
    level: &str,
) -> Vec<PlanDay> {
    let total_days = (exam_date - today).num_days();
    if total_days <= 0 {
        return Vec::new();
    }

    let mut revision_days = MAX_REVISION_DAYS.min(total_days / 4);
    let mut study_days = total_days - revision_days;
    if study_days <= 0 {
        study_days = total_days;
        revision_days = 0;
    }

    let topics: Vec<&str> = topics
        .iter()
        .map(|topic| topic.trim())
        .filter(|topic| !topic.is_empty())
        .collect();
    let topics = if topics.is_empty() {
        vec![FALLBACK_TOPIC]
    } else {
        topics
    };
    let level = StudyLevel::parse(level);

    let mut plan = Vec::with_capacity(total_days as usize);
    for i in 0..study_days as usize {
        let topic = topics[i % topics.len()];
        plan.push(PlanDay {
            date: today + Duration::days(i as i64),
            tasks: level.tasks_for(topic, i),
        });
    }

    for i in 0..revision_days {
        plan.push(PlanDay {
            date: today + Duration::days(study_days + i),
            tasks: revision_tasks(),
        });
    }

    plan
}
