//! View models
//!
//! Denormalized shapes the state containers hand to a presentation layer.
//! All models use serde so a front end bridge can ship them as JSON.

use crate::gateway::rows::{
    MemberRole, ProfileRow, SubtaskRow, TaskPatch, TaskPriority, TaskStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User-facing display data for an identity
pub type Profile = ProfileRow;

pub type Subtask = SubtaskRow;

/// Assignee summary embedded in a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignee {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// A task with its subtasks, flattened tags and assignee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskWithDetails {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee_id: Option<String>,
    pub project_id: String,
    pub progress: f64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub subtasks: Vec<Subtask>,
    pub tags: Vec<String>,
    pub assignee: Option<Assignee>,
}

impl TaskWithDetails {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status != TaskStatus::Done && self.due_date.is_some_and(|due| due < now)
    }
}

/// Project member as shown on team views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub role: MemberRole,
}

/// A project with its denormalized membership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectWithDetails {
    pub id: String,
    pub title: String,
    pub description: String,
    pub color: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub members: Vec<Member>,
}

/// Which task view is in focus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    List,
    Kanban,
    Calendar,
    Gantt,
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViewMode::List => "list",
            ViewMode::Kanban => "kanban",
            ViewMode::Calendar => "calendar",
            ViewMode::Gantt => "gantt",
        })
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list" => Ok(ViewMode::List),
            "kanban" => Ok(ViewMode::Kanban),
            "calendar" => Ok(ViewMode::Calendar),
            "gantt" => Ok(ViewMode::Gantt),
            other => Err(format!("unknown view mode: {}", other)),
        }
    }
}

/// Form input for a new task. The creator is filled in from the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTaskInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee_id: Option<String>,
    pub project_id: String,
    #[serde(default)]
    pub progress: f64,
    /// Replaces the stored subtasks when non-empty
    #[serde(default)]
    pub subtasks: Vec<SubtaskInput>,
    /// Replaces the stored tags when non-empty
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskInput {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

impl SubtaskInput {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            completed: false,
        }
    }
}

/// Task edit: field changes plus optional replacement subtasks and tags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(flatten)]
    pub patch: TaskPatch,
    /// Replaces the stored subtasks when non-empty
    #[serde(default)]
    pub subtasks: Vec<SubtaskInput>,
    /// Replaces the stored tags when non-empty
    #[serde(default)]
    pub tags: Vec<String>,
}

impl From<TaskPatch> for TaskUpdate {
    fn from(patch: TaskPatch) -> Self {
        Self {
            patch,
            ..Default::default()
        }
    }
}

/// Form input for a new project. The owner is filled in from the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProjectInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub color: Option<String>,
}
