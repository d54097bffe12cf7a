//! Daily productivity rollups and dashboard statistics.
//!
//! Tallies are pure functions over a snapshot of tasks; `generate_daily_insight`
//! wraps them with the assistant call and the World command path.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::SharedState;
use crate::world::{Command, InsightDraft, ProductivityInsight, Task, TaskStatus, World};

pub const RECENT_TASKS: usize = 5;
pub const CHART_DAYS: i64 = 7;

// ── Daily tally ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct DailyTally {
    pub tasks_completed: u32,
    pub total_focus_time: u32,
    pub average_task_duration: f64,
    pub peak_productivity_hour: Option<u8>,
}

/// Roll up the tasks touched on `today`.
///
/// Focus time counts actual minutes, else the estimate, for every finished
/// task. The average only looks at finished tasks with actual minutes.
/// The peak hour is the hour holding the most completions that day, earliest
/// hour on a tie.
pub fn tally(tasks: &[&Task], today: NaiveDate) -> DailyTally {
    let done: Vec<&Task> = tasks
        .iter()
        .copied()
        .filter(|t| t.updated_at.date_naive() == today && t.status == TaskStatus::Done)
        .collect();

    let total_focus_time = done
        .iter()
        .map(|t| t.actual_duration.or(t.estimated_duration).unwrap_or(0))
        .fold(0u32, u32::saturating_add);

    let actuals: Vec<u32> = done.iter().filter_map(|t| t.actual_duration).collect();
    let average_task_duration = if actuals.is_empty() {
        0.0
    } else {
        actuals.iter().map(|m| f64::from(*m)).sum::<f64>() / actuals.len() as f64
    };

    let mut per_hour = [0u32; 24];
    for completed in done.iter().filter_map(|t| t.completed_at).filter(|c| c.date_naive() == today) {
        per_hour[completed.hour() as usize] += 1;
    }
    let peak_productivity_hour = per_hour
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .fold(None, |best: Option<(usize, u32)>, (hour, count)| match best {
            Some((_, top)) if top >= *count => best,
            _ => Some((hour, *count)),
        })
        .map(|(hour, _)| hour as u8);

    DailyTally {
        tasks_completed: done.len() as u32,
        total_focus_time,
        average_task_duration,
        peak_productivity_hour,
    }
}

/// A user's tasks last updated on `today`.
pub fn touched_on(world: &World, user_id: Uuid, today: NaiveDate) -> Vec<&Task> {
    world
        .recent_tasks(user_id)
        .into_iter()
        .filter(|t| t.updated_at.date_naive() == today)
        .collect()
}

/// Recompute and upsert today's insight for a user.
///
/// The world lock is released while the assistant is consulted, so the
/// insight reflects the snapshot taken at the start.
pub async fn generate_daily_insight(state: &SharedState, user_id: Uuid) -> Option<ProductivityInsight> {
    let now = Utc::now();
    let today = now.date_naive();

    let (tally, summaries) = {
        let world = match state.world.read() {
            Ok(w) => w,
            Err(_) => {
                tracing::error!("world lock poisoned, skipping daily insight");
                return None;
            }
        };
        let tasks = touched_on(&world, user_id, today);
        let summaries: Vec<_> = tasks.iter().map(|t| t.summary(now)).collect();
        (tally(&tasks, today), summaries)
    };

    let recommendations = state.assistant.recommendations(&summaries).await.into_value();

    let mut world = match state.world.write() {
        Ok(w) => w,
        Err(_) => {
            tracing::error!("world lock poisoned, skipping daily insight");
            return None;
        }
    };
    let cmd = Command::RecordInsight(InsightDraft {
        date: today,
        tasks_completed: tally.tasks_completed,
        total_focus_time: tally.total_focus_time,
        average_task_duration: tally.average_task_duration,
        peak_productivity_hour: tally.peak_productivity_hour,
        recommendations,
    });
    let event = match world.apply(cmd, user_id, now) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "cannot record daily insight");
            return None;
        }
    };
    if let Err(e) = state.save_file.flush(&world, &event) {
        tracing::error!(error = %e, revision = event.revision(), "save file flush failed");
    }

    world.insights.get(&(user_id, today)).cloned()
}

// ── Dashboard ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskCounts {
    pub total: usize,
    pub completed: usize,
    /// TODO or IN_PROGRESS
    pub pending: usize,
    /// Pending with a due date in the past
    pub overdue: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub dates: Vec<String>,
    pub completed: Vec<u32>,
}

pub fn task_counts(tasks: &[&Task], now: DateTime<Utc>) -> TaskCounts {
    let pending: Vec<&&Task> = tasks.iter().filter(|t| t.status.is_open()).collect();
    TaskCounts {
        total: tasks.len(),
        completed: tasks.iter().filter(|t| t.status == TaskStatus::Done).count(),
        pending: pending.len(),
        overdue: pending.iter().filter(|t| t.due_date.is_some_and(|due| due < now)).count(),
    }
}

/// Completed counts for insights recorded within the last week, oldest first.
pub fn chart_data(world: &World, user_id: Uuid, today: NaiveDate) -> ChartData {
    let insights = world.insights_since(user_id, today - Duration::days(CHART_DAYS));
    ChartData {
        dates: insights.iter().map(|i| i.date.format("%Y-%m-%d").to_string()).collect(),
        completed: insights.iter().map(|i| i.tasks_completed).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Priority, TaskChanges, TaskDraft};
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 11, hour, minute, 0).unwrap()
    }

    fn today() -> NaiveDate {
        at(0, 0).date_naive()
    }

    fn user() -> Uuid {
        Uuid::from_u128(42)
    }

    fn add(w: &mut World, title: &str, estimated: Option<u32>, actual: Option<u32>, created: DateTime<Utc>) -> Uuid {
        let draft = TaskDraft {
            title: title.into(),
            priority: Priority::Medium,
            estimated_duration: estimated,
            actual_duration: actual,
            ..TaskDraft::default()
        };
        match w.apply(Command::CreateTask(draft), user(), created).unwrap() {
            crate::world::Event::TaskCreated { task, .. } => task.id,
            _ => panic!("expected TaskCreated"),
        }
    }

    fn finish(w: &mut World, id: Uuid, when: DateTime<Utc>) {
        w.apply(
            Command::UpdateTask {
                task_id: id,
                changes: TaskChanges { status: Some(TaskStatus::Done), ..TaskChanges::default() },
            },
            user(),
            when,
        ).unwrap();
    }

    #[test]
    fn empty_day() {
        let t = tally(&[], today());
        assert_eq!(
            t,
            DailyTally { tasks_completed: 0, total_focus_time: 0, average_task_duration: 0.0, peak_productivity_hour: None }
        );
    }

    #[test]
    fn focus_time_prefers_actual_minutes() {
        let mut w = World::new();
        let a = add(&mut w, "a", Some(30), Some(45), at(8, 0));
        let b = add(&mut w, "b", Some(20), None, at(8, 0));
        let c = add(&mut w, "c", None, None, at(8, 0));
        add(&mut w, "still open", Some(600), None, at(8, 0));
        finish(&mut w, a, at(10, 5));
        finish(&mut w, b, at(10, 40));
        finish(&mut w, c, at(14, 0));

        let tasks = touched_on(&w, user(), today());
        let t = tally(&tasks, today());
        assert_eq!(t.tasks_completed, 3);
        assert_eq!(t.total_focus_time, 45 + 20);
        assert_eq!(t.average_task_duration, 45.0);
        assert_eq!(t.peak_productivity_hour, Some(10));
    }

    #[test]
    fn peak_hour_tie_takes_earliest() {
        let mut w = World::new();
        let a = add(&mut w, "a", None, Some(10), at(7, 0));
        let b = add(&mut w, "b", None, Some(30), at(7, 0));
        finish(&mut w, b, at(16, 0));
        finish(&mut w, a, at(9, 0));

        let tasks = touched_on(&w, user(), today());
        let t = tally(&tasks, today());
        assert_eq!(t.peak_productivity_hour, Some(9));
        assert_eq!(t.average_task_duration, 20.0);
    }

    #[test]
    fn yesterdays_work_is_not_today() {
        let mut w = World::new();
        let yesterday = at(9, 0) - Duration::days(1);
        let a = add(&mut w, "old", None, Some(10), yesterday);
        finish(&mut w, a, yesterday);

        assert!(touched_on(&w, user(), today()).is_empty());
        let all = w.recent_tasks(user());
        assert_eq!(tally(&all, today()).tasks_completed, 0);
    }

    #[test]
    fn dashboard_counts() {
        let mut w = World::new();
        let now = at(12, 0);
        let done = add(&mut w, "done", None, None, at(8, 0));
        finish(&mut w, done, at(9, 0));
        let late = add(&mut w, "late", None, None, at(8, 0));
        w.tasks.get_mut(&late).unwrap().due_date = Some(at(11, 0));
        let later = add(&mut w, "later", None, None, at(8, 0));
        w.tasks.get_mut(&later).unwrap().due_date = Some(at(18, 0));
        let parked = add(&mut w, "parked", None, None, at(8, 0));
        w.tasks.get_mut(&parked).unwrap().status = TaskStatus::Archived;
        w.tasks.get_mut(&parked).unwrap().due_date = Some(at(1, 0));

        let tasks = w.recent_tasks(user());
        assert_eq!(
            task_counts(&tasks, now),
            TaskCounts { total: 4, completed: 1, pending: 2, overdue: 1 }
        );
    }

    #[test]
    fn chart_covers_last_week_oldest_first() {
        let mut w = World::new();
        for offset in [8, 7, 3, 0] {
            w.apply(
                Command::RecordInsight(InsightDraft {
                    date: today() - Duration::days(offset),
                    tasks_completed: offset as u32 + 1,
                    total_focus_time: 0,
                    average_task_duration: 0.0,
                    peak_productivity_hour: None,
                    recommendations: String::new(),
                }),
                user(),
                at(12, 0),
            ).unwrap();
        }

        let chart = chart_data(&w, user(), today());
        assert_eq!(chart.dates, vec!["2026-02-04", "2026-02-08", "2026-02-11"]);
        assert_eq!(chart.completed, vec![8, 4, 1]);
    }
}
