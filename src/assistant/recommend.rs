//! Productivity recommendations: prompt building for the coaching model and
//! the heuristics used without it.

use serde::{Deserialize, Serialize};

use crate::world::{Priority, TaskStatus};

/// How many tasks go into the coaching prompt.
pub const PROMPT_TASK_LIMIT: usize = 10;
/// More open tasks than this triggers the breakdown suggestion.
pub const BACKLOG_THRESHOLD: usize = 10;

pub const EMPTY_MESSAGE: &str = "Start by adding some tasks to get personalized recommendations!";
pub const ALL_GOOD_MESSAGE: &str = "You're doing great! Keep up the good work.";
pub const BREAKDOWN_MESSAGE: &str = "Consider breaking down large tasks into smaller, manageable ones.";
pub const OVERDUE_MESSAGE: &str = "Address overdue tasks to reduce stress.";

/// The slice of a task the recommender looks at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub title: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub is_overdue: bool,
}

impl TaskSummary {
    fn is_pending(&self) -> bool {
        self.status != TaskStatus::Done
    }
}

/// `- title (Priority: P, Status: S)` for the first ten tasks.
pub fn summary_lines(tasks: &[TaskSummary]) -> String {
    tasks
        .iter()
        .take(PROMPT_TASK_LIMIT)
        .map(|t| format!("- {} (Priority: {}, Status: {})", t.title, t.priority, t.status))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn coaching_prompt(tasks: &[TaskSummary]) -> String {
    format!(
        "Based on these tasks, provide productivity recommendations:\n{}\n\n\
         Return recommendations as a list of suggestions.",
        summary_lines(tasks)
    )
}

/// Heuristic advice. Lines appear in a fixed order:
/// high-priority count, backlog size, overdue work.
pub fn fallback_recommendations(tasks: &[TaskSummary]) -> String {
    if tasks.is_empty() {
        return EMPTY_MESSAGE.to_string();
    }

    let pending: Vec<&TaskSummary> = tasks.iter().filter(|t| t.is_pending()).collect();
    let high_priority = pending.iter().filter(|t| t.priority.is_high()).count();

    let mut lines = Vec::new();
    if high_priority > 0 {
        lines.push(format!("Focus on your {high_priority} high-priority tasks first."));
    }
    if pending.len() > BACKLOG_THRESHOLD {
        lines.push(BREAKDOWN_MESSAGE.to_string());
    }
    if pending.iter().any(|t| t.is_overdue) {
        lines.push(OVERDUE_MESSAGE.to_string());
    }

    if lines.is_empty() {
        ALL_GOOD_MESSAGE.to_string()
    } else {
        lines.join("\n")
    }
}
