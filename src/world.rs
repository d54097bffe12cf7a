use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::assistant::TaskSummary;

pub const TITLE_MAX: usize = 200;
pub const CATEGORY_NAME_MAX: usize = 100;
pub const DEFAULT_CATEGORY_COLOR: &str = "#007bff";

// ── Entity types ──────────────────────────────────────────────

/// Task status lifecycle: Todo → InProgress → Done, Archived from anywhere.
///
/// Done is the only status that carries a completed_at timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Archived,
}

impl TaskStatus {
    /// Todo or InProgress, what the dashboard counts as "pending".
    pub fn is_open(self) -> bool {
        matches!(self, TaskStatus::Todo | TaskStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Done => "DONE",
            TaskStatus::Archived => "ARCHIVED",
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Todo
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TODO" => Ok(TaskStatus::Todo),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "DONE" => Ok(TaskStatus::Done),
            "ARCHIVED" => Ok(TaskStatus::Archived),
            _ => Err(format!("unknown status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        }
    }

    /// Human-facing label ("Urgent"), used in quick-add responses.
    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
            Priority::Urgent => "Urgent",
        }
    }

    /// Normalized weight stored as `ai_priority_score` on parsed tasks.
    pub fn score(self) -> f32 {
        match self {
            Priority::Low => 0.25,
            Priority::Medium => 0.5,
            Priority::High => 0.75,
            Priority::Urgent => 1.0,
        }
    }

    pub fn is_high(self) -> bool {
        self >= Priority::High
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "MEDIUM" => Ok(Priority::Medium),
            "HIGH" => Ok(Priority::High),
            "URGENT" => Ok(Priority::Urgent),
            _ => Err(format!("unknown priority: {s}")),
        }
    }
}

/// Fields filled in from the natural-language parser, kept alongside
/// whatever the user chose so the two can be compared later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiAnnotations {
    pub priority_score: Option<f32>,
    pub category_suggestion: String,
    pub estimated_duration: Option<u32>,
}

/// A user-owned task.
///
/// Durations are minutes. `completed_at` is Some exactly when status is Done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub owner: Uuid,
    pub title: String,
    pub description: String,
    pub category_id: Option<Uuid>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_duration: Option<u32>,
    pub actual_duration: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub ai: AiAnnotations,
}

impl Task {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match self.due_date {
            Some(due) => self.status != TaskStatus::Done && due < now,
            None => false,
        }
    }

    pub fn summary(&self, now: DateTime<Utc>) -> TaskSummary {
        TaskSummary {
            title: self.title.clone(),
            priority: self.priority,
            status: self.status,
            is_overdue: self.is_overdue(now),
        }
    }

    fn sync_completion(&mut self, now: DateTime<Utc>) {
        if self.status == TaskStatus::Done {
            self.completed_at.get_or_insert(now);
        } else {
            self.completed_at = None;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub owner: Uuid,
    pub name: String,
    /// `#RRGGBB`
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
}

/// Per-user, per-day rollup. At most one per (user, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductivityInsight {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub tasks_completed: u32,
    /// Minutes
    pub total_focus_time: u32,
    /// Minutes
    pub average_task_duration: f64,
    pub peak_productivity_hour: Option<u8>,
    pub recommendations: String,
}

// ── Commands (handlers → world) ───────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub category_id: Option<Uuid>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_duration: Option<u32>,
    pub actual_duration: Option<u32>,
    pub ai: AiAnnotations,
}

/// Partial update. Outer None = leave as is; `Some(None)` clears.
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<Option<Uuid>>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub estimated_duration: Option<Option<u32>>,
    pub actual_duration: Option<Option<u32>>,
}

#[derive(Debug, Clone)]
pub struct InsightDraft {
    pub date: NaiveDate,
    pub tasks_completed: u32,
    pub total_focus_time: u32,
    pub average_task_duration: f64,
    pub peak_productivity_hour: Option<u8>,
    pub recommendations: String,
}

/// Something a user wants to happen.
/// The world validates it, applies it, and returns an Event (or an error).
#[derive(Debug, Clone)]
pub enum Command {
    CreateTask(TaskDraft),
    UpdateTask { task_id: Uuid, changes: TaskChanges },
    DeleteTask { task_id: Uuid },
    CreateCategory { name: String, color: Option<String> },
    RecordInsight(InsightDraft),
}

// ── Events (world → save file) ────────────────────────────────

/// What actually happened, stamped with the revision it was applied at.
#[derive(Debug, Clone)]
pub enum Event {
    TaskCreated { revision: u64, task: Task },
    TaskUpdated { revision: u64, task: Task },
    TaskDeleted { revision: u64, task_id: Uuid },
    CategoryCreated { revision: u64, category: Category },
    InsightRecorded { revision: u64, insight: ProductivityInsight },
}

impl Event {
    pub fn revision(&self) -> u64 {
        match self {
            Event::TaskCreated { revision, .. }
            | Event::TaskUpdated { revision, .. }
            | Event::TaskDeleted { revision, .. }
            | Event::CategoryCreated { revision, .. }
            | Event::InsightRecorded { revision, .. } => *revision,
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("Task not found")]
    TaskNotFound,
    #[error("Category not found")]
    CategoryNotFound,
    #[error("A category with this name already exists")]
    DuplicateCategory,
    #[error("Title must be 1 to 200 characters")]
    InvalidTitle,
    #[error("Category name must be 1 to 100 characters")]
    InvalidCategoryName,
    #[error("Color must look like #RRGGBB")]
    InvalidColor,
    #[error("Durations must be positive minutes")]
    InvalidDuration,
}

// ── Queries ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub category_id: Option<Uuid>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self.priority.map_or(true, |p| task.priority == p)
            && self.category_id.map_or(true, |c| task.category_id == Some(c))
    }
}

/// Priority first (Urgent on top), then earliest due date with undated
/// tasks last, then oldest first.
fn default_order(a: &Task, b: &Task) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| match (a.due_date, b.due_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.created_at.cmp(&b.created_at))
}

// ── The World ──────────────────────────────────────────────────

/// The authoritative application state. Lives in memory, loaded from the
/// save file on boot. All mutations go through apply() which validates,
/// mutates, and returns an Event for the save file.
#[derive(Debug, Default)]
pub struct World {
    pub tasks: HashMap<Uuid, Task>,
    pub users: HashMap<Uuid, User>,
    pub categories: HashMap<Uuid, Category>,
    pub insights: HashMap<(Uuid, NaiveDate), ProductivityInsight>,
    pub revision: u64,
}

impl World {
    pub fn new() -> Self {
        World::default()
    }

    /// Apply a command on behalf of `user_id`. Returns the resulting Event.
    /// Every state change goes through here; a rejected command changes nothing.
    pub fn apply(&mut self, cmd: Command, user_id: Uuid, now: DateTime<Utc>) -> Result<Event, WorldError> {
        match cmd {
            Command::CreateTask(draft) => {
                let title = validate_title(&draft.title)?;
                validate_duration(draft.estimated_duration)?;
                validate_duration(draft.actual_duration)?;
                if let Some(category_id) = draft.category_id {
                    self.owned_category(user_id, category_id)?;
                }

                let mut task = Task {
                    id: Uuid::new_v4(),
                    owner: user_id,
                    title,
                    description: draft.description,
                    category_id: draft.category_id,
                    priority: draft.priority,
                    status: draft.status,
                    due_date: draft.due_date,
                    estimated_duration: draft.estimated_duration,
                    actual_duration: draft.actual_duration,
                    created_at: now,
                    updated_at: now,
                    completed_at: None,
                    ai: draft.ai,
                };
                task.sync_completion(now);

                self.revision += 1;
                self.tasks.insert(task.id, task.clone());
                Ok(Event::TaskCreated { revision: self.revision, task })
            }

            Command::UpdateTask { task_id, changes } => {
                // Validate everything before touching the task
                let title = changes.title.as_deref().map(validate_title).transpose()?;
                if let Some(estimated) = changes.estimated_duration {
                    validate_duration(estimated)?;
                }
                if let Some(actual) = changes.actual_duration {
                    validate_duration(actual)?;
                }
                if let Some(Some(category_id)) = changes.category_id {
                    self.owned_category(user_id, category_id)?;
                }

                let task = self.tasks.get_mut(&task_id)
                    .filter(|t| t.owner == user_id)
                    .ok_or(WorldError::TaskNotFound)?;

                if let Some(title) = title {
                    task.title = title;
                }
                if let Some(description) = changes.description {
                    task.description = description;
                }
                if let Some(category_id) = changes.category_id {
                    task.category_id = category_id;
                }
                if let Some(priority) = changes.priority {
                    task.priority = priority;
                }
                if let Some(status) = changes.status {
                    task.status = status;
                }
                if let Some(due_date) = changes.due_date {
                    task.due_date = due_date;
                }
                if let Some(estimated) = changes.estimated_duration {
                    task.estimated_duration = estimated;
                }
                if let Some(actual) = changes.actual_duration {
                    task.actual_duration = actual;
                }
                task.updated_at = now;
                task.sync_completion(now);

                self.revision += 1;
                Ok(Event::TaskUpdated { revision: self.revision, task: task.clone() })
            }

            Command::DeleteTask { task_id } => {
                match self.tasks.get(&task_id) {
                    Some(task) if task.owner == user_id => {}
                    _ => return Err(WorldError::TaskNotFound),
                }
                self.tasks.remove(&task_id);

                self.revision += 1;
                Ok(Event::TaskDeleted { revision: self.revision, task_id })
            }

            Command::CreateCategory { name, color } => {
                let name = name.trim().to_string();
                if name.is_empty() || name.chars().count() > CATEGORY_NAME_MAX {
                    return Err(WorldError::InvalidCategoryName);
                }
                let color = match color {
                    Some(c) => validate_color(&c)?,
                    None => DEFAULT_CATEGORY_COLOR.to_string(),
                };
                if self.categories.values().any(|c| c.owner == user_id && c.name == name) {
                    return Err(WorldError::DuplicateCategory);
                }

                let category = Category { id: Uuid::new_v4(), owner: user_id, name, color };

                self.revision += 1;
                self.categories.insert(category.id, category.clone());
                Ok(Event::CategoryCreated { revision: self.revision, category })
            }

            Command::RecordInsight(draft) => {
                let insight = ProductivityInsight {
                    user_id,
                    date: draft.date,
                    tasks_completed: draft.tasks_completed,
                    total_focus_time: draft.total_focus_time,
                    average_task_duration: draft.average_task_duration,
                    peak_productivity_hour: draft.peak_productivity_hour.filter(|h| *h < 24),
                    recommendations: draft.recommendations,
                };

                self.revision += 1;
                self.insights.insert((user_id, insight.date), insight.clone());
                Ok(Event::InsightRecorded { revision: self.revision, insight })
            }
        }
    }

    /// Look up a user by username (linear scan).
    pub fn get_user_by_username(&self, username: &str) -> Option<&User> {
        self.users.values().find(|u| u.username == username)
    }

    pub fn task_for(&self, user_id: Uuid, task_id: Uuid) -> Option<&Task> {
        self.tasks.get(&task_id).filter(|t| t.owner == user_id)
    }

    /// A user's tasks matching the filter, in default list order.
    pub fn tasks_for(&self, user_id: Uuid, filter: &TaskFilter) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values()
            .filter(|t| t.owner == user_id && filter.matches(t))
            .collect();
        tasks.sort_by(|a, b| default_order(a, b));
        tasks
    }

    /// A user's tasks, newest first.
    pub fn recent_tasks(&self, user_id: Uuid) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values()
            .filter(|t| t.owner == user_id)
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    pub fn categories_for(&self, user_id: Uuid) -> Vec<&Category> {
        let mut categories: Vec<&Category> = self.categories.values()
            .filter(|c| c.owner == user_id)
            .collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        categories
    }

    /// First of the user's categories (by name) whose name contains the
    /// suggestion, case-insensitively.
    pub fn match_category(&self, user_id: Uuid, suggestion: &str) -> Option<&Category> {
        let needle = suggestion.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.categories_for(user_id)
            .into_iter()
            .find(|c| c.name.to_lowercase().contains(&needle))
    }

    /// A user's insights, newest date first.
    pub fn insights_for(&self, user_id: Uuid) -> Vec<&ProductivityInsight> {
        let mut insights: Vec<&ProductivityInsight> = self.insights.values()
            .filter(|i| i.user_id == user_id)
            .collect();
        insights.sort_by(|a, b| b.date.cmp(&a.date));
        insights
    }

    /// A user's insights on or after `since`, oldest first (chart order).
    pub fn insights_since(&self, user_id: Uuid, since: NaiveDate) -> Vec<&ProductivityInsight> {
        let mut insights: Vec<&ProductivityInsight> = self.insights.values()
            .filter(|i| i.user_id == user_id && i.date >= since)
            .collect();
        insights.sort_by(|a, b| a.date.cmp(&b.date));
        insights
    }

    fn owned_category(&self, user_id: Uuid, category_id: Uuid) -> Result<&Category, WorldError> {
        self.categories.get(&category_id)
            .filter(|c| c.owner == user_id)
            .ok_or(WorldError::CategoryNotFound)
    }
}

// ── Validation helpers ─────────────────────────────────────────

fn validate_title(title: &str) -> Result<String, WorldError> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > TITLE_MAX {
        return Err(WorldError::InvalidTitle);
    }
    Ok(title.to_string())
}

fn validate_duration(minutes: Option<u32>) -> Result<(), WorldError> {
    match minutes {
        Some(0) => Err(WorldError::InvalidDuration),
        _ => Ok(()),
    }
}

fn validate_color(color: &str) -> Result<String, WorldError> {
    let color = color.trim();
    let hex = color.strip_prefix('#').ok_or(WorldError::InvalidColor)?;
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(WorldError::InvalidColor);
    }
    Ok(color.to_ascii_lowercase())
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 11, 9, 0, 0).unwrap()
    }

    fn alice() -> Uuid {
        Uuid::from_u128(1)
    }

    fn bob() -> Uuid {
        Uuid::from_u128(2)
    }

    fn draft(title: &str, priority: Priority) -> TaskDraft {
        TaskDraft { title: title.into(), priority, ..TaskDraft::default() }
    }

    fn create_task(w: &mut World, title: &str, priority: Priority) -> Uuid {
        match w.apply(Command::CreateTask(draft(title, priority)), alice(), t0()).unwrap() {
            Event::TaskCreated { task, .. } => task.id,
            _ => panic!("expected TaskCreated"),
        }
    }

    fn set_status(w: &mut World, id: Uuid, status: TaskStatus, now: DateTime<Utc>) {
        w.apply(
            Command::UpdateTask {
                task_id: id,
                changes: TaskChanges { status: Some(status), ..TaskChanges::default() },
            },
            alice(),
            now,
        ).unwrap();
    }

    #[test]
    fn create_task_defaults() {
        let mut w = World::new();
        let id = create_task(&mut w, "  Write report  ", Priority::Medium);

        let task = &w.tasks[&id];
        assert_eq!(task.title, "Write report");
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.owner, alice());
        assert_eq!(task.completed_at, None);
        assert_eq!(task.created_at, t0());
        assert_eq!(w.revision, 1);
    }

    #[test]
    fn create_task_already_done_sets_completed_at() {
        let mut w = World::new();
        let mut d = draft("Done already", Priority::Low);
        d.status = TaskStatus::Done;
        let event = w.apply(Command::CreateTask(d), alice(), t0()).unwrap();
        match event {
            Event::TaskCreated { task, .. } => assert_eq!(task.completed_at, Some(t0())),
            _ => panic!("expected TaskCreated"),
        }
    }

    #[test]
    fn completed_at_follows_status() {
        let mut w = World::new();
        let id = create_task(&mut w, "Ship it", Priority::High);

        let done_at = t0() + Duration::hours(2);
        set_status(&mut w, id, TaskStatus::Done, done_at);
        assert_eq!(w.tasks[&id].completed_at, Some(done_at));

        // Staying done keeps the original completion time
        set_status(&mut w, id, TaskStatus::Done, done_at + Duration::hours(1));
        assert_eq!(w.tasks[&id].completed_at, Some(done_at));

        set_status(&mut w, id, TaskStatus::InProgress, done_at + Duration::hours(2));
        assert_eq!(w.tasks[&id].completed_at, None);

        set_status(&mut w, id, TaskStatus::Archived, done_at + Duration::hours(3));
        assert_eq!(w.tasks[&id].completed_at, None);
    }

    #[test]
    fn overdue_requires_past_due_and_not_done() {
        let mut w = World::new();
        let id = create_task(&mut w, "Taxes", Priority::Urgent);
        let now = t0();

        assert!(!w.tasks[&id].is_overdue(now)); // no due date

        w.tasks.get_mut(&id).unwrap().due_date = Some(now - Duration::minutes(1));
        assert!(w.tasks[&id].is_overdue(now));

        w.tasks.get_mut(&id).unwrap().due_date = Some(now + Duration::minutes(1));
        assert!(!w.tasks[&id].is_overdue(now));

        w.tasks.get_mut(&id).unwrap().due_date = Some(now - Duration::days(3));
        set_status(&mut w, id, TaskStatus::Done, now);
        assert!(!w.tasks[&id].is_overdue(now));
    }

    #[test]
    fn invalid_titles_rejected() {
        let mut w = World::new();
        let r = w.apply(Command::CreateTask(draft("   ", Priority::Low)), alice(), t0());
        assert_eq!(r.unwrap_err(), WorldError::InvalidTitle);

        let long = "x".repeat(TITLE_MAX + 1);
        let r = w.apply(Command::CreateTask(draft(&long, Priority::Low)), alice(), t0());
        assert_eq!(r.unwrap_err(), WorldError::InvalidTitle);
        assert_eq!(w.revision, 0);
    }

    #[test]
    fn zero_duration_rejected() {
        let mut w = World::new();
        let mut d = draft("Nap", Priority::Low);
        d.estimated_duration = Some(0);
        let r = w.apply(Command::CreateTask(d), alice(), t0());
        assert_eq!(r.unwrap_err(), WorldError::InvalidDuration);
    }

    #[test]
    fn other_users_tasks_are_invisible() {
        let mut w = World::new();
        let id = create_task(&mut w, "Private", Priority::Low);

        assert!(w.task_for(bob(), id).is_none());
        let r = w.apply(Command::DeleteTask { task_id: id }, bob(), t0());
        assert_eq!(r.unwrap_err(), WorldError::TaskNotFound);
        let r = w.apply(
            Command::UpdateTask { task_id: id, changes: TaskChanges::default() },
            bob(),
            t0(),
        );
        assert_eq!(r.unwrap_err(), WorldError::TaskNotFound);
        assert!(w.tasks.contains_key(&id));
    }

    #[test]
    fn update_applies_partial_changes() {
        let mut w = World::new();
        let id = create_task(&mut w, "Draft", Priority::Low);
        let later = t0() + Duration::minutes(5);

        w.apply(
            Command::UpdateTask {
                task_id: id,
                changes: TaskChanges {
                    title: Some("Final".into()),
                    priority: Some(Priority::Urgent),
                    actual_duration: Some(Some(45)),
                    ..TaskChanges::default()
                },
            },
            alice(),
            later,
        ).unwrap();

        let task = &w.tasks[&id];
        assert_eq!(task.title, "Final");
        assert_eq!(task.priority, Priority::Urgent);
        assert_eq!(task.actual_duration, Some(45));
        assert_eq!(task.description, "");
        assert_eq!(task.updated_at, later);
        assert_eq!(task.created_at, t0());
    }

    #[test]
    fn rejected_update_leaves_task_alone() {
        let mut w = World::new();
        let id = create_task(&mut w, "Keep", Priority::Low);
        let r = w.apply(
            Command::UpdateTask {
                task_id: id,
                changes: TaskChanges {
                    priority: Some(Priority::High),
                    title: Some(String::new()),
                    ..TaskChanges::default()
                },
            },
            alice(),
            t0(),
        );
        assert_eq!(r.unwrap_err(), WorldError::InvalidTitle);
        assert_eq!(w.tasks[&id].priority, Priority::Low);
        assert_eq!(w.revision, 1);
    }

    #[test]
    fn categories_unique_per_user() {
        let mut w = World::new();
        w.apply(Command::CreateCategory { name: "Work".into(), color: None }, alice(), t0()).unwrap();

        let r = w.apply(Command::CreateCategory { name: "Work".into(), color: None }, alice(), t0());
        assert_eq!(r.unwrap_err(), WorldError::DuplicateCategory);

        // Same name, different user is fine
        w.apply(Command::CreateCategory { name: "Work".into(), color: None }, bob(), t0()).unwrap();
        assert_eq!(w.categories.len(), 2);
        assert_eq!(w.categories_for(alice())[0].color, DEFAULT_CATEGORY_COLOR);
    }

    #[test]
    fn category_color_validation() {
        let mut w = World::new();
        let r = w.apply(
            Command::CreateCategory { name: "Home".into(), color: Some("blue".into()) },
            alice(),
            t0(),
        );
        assert_eq!(r.unwrap_err(), WorldError::InvalidColor);

        let event = w.apply(
            Command::CreateCategory { name: "Home".into(), color: Some("#FFAA00".into()) },
            alice(),
            t0(),
        ).unwrap();
        match event {
            Event::CategoryCreated { category, .. } => assert_eq!(category.color, "#ffaa00"),
            _ => panic!("expected CategoryCreated"),
        }
    }

    #[test]
    fn task_category_must_belong_to_user() {
        let mut w = World::new();
        let event = w.apply(Command::CreateCategory { name: "Gym".into(), color: None }, bob(), t0()).unwrap();
        let bobs = match event {
            Event::CategoryCreated { category, .. } => category.id,
            _ => panic!("expected CategoryCreated"),
        };

        let mut d = draft("Leg day", Priority::Medium);
        d.category_id = Some(bobs);
        let r = w.apply(Command::CreateTask(d), alice(), t0());
        assert_eq!(r.unwrap_err(), WorldError::CategoryNotFound);
    }

    #[test]
    fn match_category_is_case_insensitive_contains() {
        let mut w = World::new();
        w.apply(Command::CreateCategory { name: "Work Projects".into(), color: None }, alice(), t0()).unwrap();
        w.apply(Command::CreateCategory { name: "Health".into(), color: None }, alice(), t0()).unwrap();

        assert_eq!(w.match_category(alice(), "work").unwrap().name, "Work Projects");
        assert_eq!(w.match_category(alice(), "HEALTH").unwrap().name, "Health");
        assert!(w.match_category(alice(), "Learning").is_none());
        assert!(w.match_category(alice(), "").is_none());
        assert!(w.match_category(bob(), "work").is_none());
    }

    #[test]
    fn default_order_priority_due_created() {
        let mut w = World::new();
        let low = create_task(&mut w, "Low", Priority::Low);
        let urgent = create_task(&mut w, "Urgent", Priority::Urgent);
        let high_undated = create_task(&mut w, "High undated", Priority::High);
        let high_dated = create_task(&mut w, "High dated", Priority::High);
        w.tasks.get_mut(&high_dated).unwrap().due_date = Some(t0() + Duration::days(1));

        let order: Vec<Uuid> = w.tasks_for(alice(), &TaskFilter::default()).iter().map(|t| t.id).collect();
        assert_eq!(order, vec![urgent, high_dated, high_undated, low]);
    }

    #[test]
    fn filter_by_status_and_priority() {
        let mut w = World::new();
        let a = create_task(&mut w, "A", Priority::High);
        create_task(&mut w, "B", Priority::Low);
        set_status(&mut w, a, TaskStatus::Done, t0());

        let done = w.tasks_for(alice(), &TaskFilter { status: Some(TaskStatus::Done), ..TaskFilter::default() });
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, a);

        let low = w.tasks_for(alice(), &TaskFilter { priority: Some(Priority::Low), ..TaskFilter::default() });
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].title, "B");
    }

    #[test]
    fn insight_upserts_per_day() {
        let mut w = World::new();
        let day = t0().date_naive();
        let insight = |completed| InsightDraft {
            date: day,
            tasks_completed: completed,
            total_focus_time: 30,
            average_task_duration: 0.0,
            peak_productivity_hour: Some(9),
            recommendations: String::new(),
        };

        w.apply(Command::RecordInsight(insight(1)), alice(), t0()).unwrap();
        w.apply(Command::RecordInsight(insight(3)), alice(), t0()).unwrap();

        assert_eq!(w.insights.len(), 1);
        assert_eq!(w.insights[&(alice(), day)].tasks_completed, 3);
        assert_eq!(w.revision, 2);
    }

    #[test]
    fn insights_since_oldest_first() {
        let mut w = World::new();
        for offset in [0, 2, 9] {
            let date = t0().date_naive() - Duration::days(offset);
            w.apply(
                Command::RecordInsight(InsightDraft {
                    date,
                    tasks_completed: offset as u32,
                    total_focus_time: 0,
                    average_task_duration: 0.0,
                    peak_productivity_hour: None,
                    recommendations: String::new(),
                }),
                alice(),
                t0(),
            ).unwrap();
        }

        let week = w.insights_since(alice(), t0().date_naive() - Duration::days(7));
        let counts: Vec<u32> = week.iter().map(|i| i.tasks_completed).collect();
        assert_eq!(counts, vec![2, 0]);

        assert_eq!(w.insights_for(alice())[0].tasks_completed, 0);
    }

    #[test]
    fn priority_parsing_and_scores() {
        assert_eq!("urgent".parse::<Priority>().unwrap(), Priority::Urgent);
        assert_eq!(" High ".parse::<Priority>().unwrap(), Priority::High);
        assert!("critical".parse::<Priority>().is_err());
        assert_eq!(Priority::Low.score(), 0.25);
        assert_eq!(Priority::Urgent.score(), 1.0);
        assert_eq!(Priority::Urgent.label(), "Urgent");
        assert!(Priority::High.is_high());
        assert!(!Priority::Medium.is_high());
        assert_eq!("in_progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
    }

    #[test]
    fn delete_task_bumps_revision() {
        let mut w = World::new();
        let id = create_task(&mut w, "Gone", Priority::Low);
        let event = w.apply(Command::DeleteTask { task_id: id }, alice(), t0()).unwrap();
        assert_eq!(event.revision(), 2);
        assert!(w.tasks.is_empty());
    }
}
