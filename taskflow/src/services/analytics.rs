//! Task analytics
//!
//! Summary figures over a task and project snapshot.

use crate::gateway::{TaskPriority, TaskStatus};
use crate::models::{ProjectWithDetails, TaskWithDetails};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectProgress {
    pub project_id: String,
    pub title: String,
    pub color: String,
    pub tasks: usize,
    pub completed: usize,
    /// Whole percent of tasks done, 0 for an empty project
    pub progress: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub overdue: usize,
    /// Completed share of all tasks in [0, 1]
    pub completion_rate: f64,
    pub by_status: Vec<(TaskStatus, usize)>,
    pub by_priority: Vec<(TaskPriority, usize)>,
    pub projects: Vec<ProjectProgress>,
}

fn count(tasks: &[TaskWithDetails], pred: impl Fn(&TaskWithDetails) -> bool) -> usize {
    tasks.iter().filter(|t| pred(t)).count()
}

fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        0
    } else {
        ((part as f64 / whole as f64) * 100.0).round() as u32
    }
}

pub fn summarize(
    tasks: &[TaskWithDetails],
    projects: &[ProjectWithDetails],
    now: DateTime<Utc>,
) -> TaskSummary {
    let total = tasks.len();
    let completed = count(tasks, |t| t.status == TaskStatus::Done);

    let projects = projects
        .iter()
        .map(|project| {
            let in_project = count(tasks, |t| t.project_id == project.id);
            let done = count(tasks, |t| {
                t.project_id == project.id && t.status == TaskStatus::Done
            });
            ProjectProgress {
                project_id: project.id.clone(),
                title: project.title.clone(),
                color: project.color.clone(),
                tasks: in_project,
                completed: done,
                progress: percent(done, in_project),
            }
        })
        .collect();

    TaskSummary {
        total,
        completed,
        in_progress: count(tasks, |t| t.status == TaskStatus::InProgress),
        blocked: count(tasks, |t| t.status == TaskStatus::Blocked),
        overdue: count(tasks, |t| t.is_overdue(now)),
        completion_rate: if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        },
        by_status: TaskStatus::ALL
            .iter()
            .map(|s| (*s, count(tasks, |t| t.status == *s)))
            .collect(),
        by_priority: TaskPriority::ALL
            .iter()
            .map(|p| (*p, count(tasks, |t| t.priority == *p)))
            .collect(),
        projects,
    }
}
