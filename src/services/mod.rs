pub mod adaptive;
pub mod ai_adaptive;
pub mod feedback;

use crate::planning::StudyPlan;

/// Topics to regenerate a plan from. Plans stored without topics study their
/// subject as a whole.
pub(crate) fn plan_topics(plan: &StudyPlan) -> Vec<String> {
    let topics: Vec<String> = plan
        .topics
        .iter()
        .map(|topic| topic.trim())
        .filter(|topic| !topic.is_empty())
        .map(str::to_string)
        .collect();
    if topics.is_empty() {
        vec![plan.subject.clone()]
    } else {
        topics
    }
}
