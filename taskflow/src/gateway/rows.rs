//! Wire rows
//!
//! One struct per backend table plus the join shapes returned by embedded
//! selects. These mirror the backend contract field for field; view models
//! live in `crate::models`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unknown value for one of the text enums below
#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseEnumError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Review,
    Done,
    Blocked,
}

text_enum!(TaskStatus, "task status", {
    Todo => "todo",
    InProgress => "in-progress",
    Review => "review",
    Done => "done",
    Blocked => "blocked",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

text_enum!(TaskPriority, "task priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

text_enum!(MemberRole, "member role", {
    Owner => "owner",
    Admin => "admin",
    Member => "member",
    Viewer => "viewer",
});

// ===== Auth =====

/// Authenticated account handle issued by the backend auth subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

/// Result of a successful sign-in or sign-up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub user: AuthUser,
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

// ===== Tables =====

/// `profiles` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProfileRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<Option<String>>,
}

/// `projects` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub color: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    pub color: String,
    pub owner_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// `project_members` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProjectMember {
    pub project_id: String,
    pub user_id: String,
    pub role: MemberRole,
}

/// `tasks` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TaskRow {
    pub id: String,
    pub title: String,
    pub description: String,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    #[sqlx(try_from = "String")]
    pub priority: TaskPriority,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee_id: Option<String>,
    pub project_id: String,
    pub progress: f64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewTask {
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
}

/// Partial task update. `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

/// `subtasks` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SubtaskRow {
    pub id: String,
    pub task_id: String,
    pub title: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubtask {
    pub task_id: String,
    pub title: String,
    pub completed: bool,
}

/// `task_tags` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TaskTagRow {
    pub id: String,
    pub task_id: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTaskTag {
    pub task_id: String,
    pub tag: String,
}

// ===== Join shapes =====

/// Profile columns embedded in task and membership joins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProfileSummary {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// `task_tags (tag)` embed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagOnly {
    pub tag: String,
}

/// `project_members (role, user:profiles (...))` embed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberJoinRow {
    pub role: MemberRole,
    pub user: Option<ProfileSummary>,
}

/// Project with its membership embed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectJoinRow {
    #[serde(flatten)]
    pub project: ProjectRow,
    #[serde(default)]
    pub project_members: Option<Vec<MemberJoinRow>>,
}

/// Task with subtasks, tags and assignee embeds.
/// Embeds come back as `null` when the relation is empty on some backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskJoinRow {
    #[serde(flatten)]
    pub task: TaskRow,
    #[serde(default)]
    pub subtasks: Option<Vec<SubtaskRow>>,
    #[serde(default)]
    pub task_tags: Option<Vec<TagOnly>>,
    #[serde(default)]
    pub assignee: Option<ProfileSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(TaskStatus::InProgress.as_str(), "in-progress");
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in-progress\""
        );
        assert_eq!("blocked".parse::<TaskStatus>().unwrap(), TaskStatus::Blocked);
        assert!("in_progress".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_task_join_row_from_embedded_select() {
        let json = r#"{
            "id": "t1",
            "title": "Write docs",
            "description": "",
            "status": "review",
            "priority": "critical",
            "start_date": null,
            "due_date": "2026-01-10T00:00:00Z",
            "assignee_id": null,
            "project_id": "p1",
            "progress": 0.5,
            "created_by": "u1",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-02T00:00:00Z",
            "subtasks": null,
            "task_tags": [{"tag": "docs"}],
            "assignee": null
        }"#;

        let row: TaskJoinRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.task.status, TaskStatus::Review);
        assert_eq!(row.task.priority, TaskPriority::Critical);
        assert!(row.subtasks.is_none());
        assert_eq!(row.task_tags.unwrap()[0].tag, "docs");
    }

    #[test]
    fn test_task_patch_skips_unset_fields() {
        let patch = TaskPatch {
            progress: Some(0.25),
            due_date: Some(None),
            ..Default::default()
        };
        let value = serde_json::to_value(&patch).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj["due_date"].is_null());
    }
}
