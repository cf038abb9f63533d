//! Demo dataset
//!
//! Fixed sample projects and tasks shown when the session is unusable, so a
//! presentation layer stays explorable without a live backend. Ids carry a
//! `demo-` prefix and never collide with backend ids (which are UUIDs).

use crate::gateway::rows::{MemberRole, SubtaskRow, TaskPriority, TaskStatus};
use crate::models::{Assignee, Member, ProjectWithDetails, TaskWithDetails};
use chrono::{DateTime, Duration, Utc};

const DEMO_USER_1: &str = "demo-user-1";
const DEMO_USER_2: &str = "demo-user-2";
pub const DEMO_PROJECT_1: &str = "demo-project-1";
pub const DEMO_PROJECT_2: &str = "demo-project-2";

const AVATAR_1: &str =
    "https://images.pexels.com/photos/220453/pexels-photo-220453.jpeg?auto=compress&cs=tinysrgb&w=150";
const AVATAR_2: &str =
    "https://images.pexels.com/photos/415829/pexels-photo-415829.jpeg?auto=compress&cs=tinysrgb&w=150";

fn john() -> Assignee {
    Assignee {
        id: DEMO_USER_1.to_string(),
        name: "John Doe".to_string(),
        avatar_url: Some(AVATAR_1.to_string()),
    }
}

fn jane() -> Assignee {
    Assignee {
        id: DEMO_USER_2.to_string(),
        name: "Jane Smith".to_string(),
        avatar_url: Some(AVATAR_2.to_string()),
    }
}

fn members() -> Vec<Member> {
    [(john(), MemberRole::Owner), (jane(), MemberRole::Member)]
        .into_iter()
        .map(|(person, role)| Member {
            id: person.id,
            name: person.name,
            avatar_url: person.avatar_url,
            role,
        })
        .collect()
}

struct DemoTask {
    id: &'static str,
    title: &'static str,
    description: &'static str,
    status: TaskStatus,
    priority: TaskPriority,
    due_in_days: i64,
    project_id: &'static str,
    assignee: Assignee,
    progress: f64,
    subtasks: &'static [(&'static str, &'static str, bool)],
    tags: &'static [&'static str],
}

impl DemoTask {
    fn build(self, now: DateTime<Utc>) -> TaskWithDetails {
        TaskWithDetails {
            id: self.id.to_string(),
            title: self.title.to_string(),
            description: self.description.to_string(),
            status: self.status,
            priority: self.priority,
            start_date: Some(now),
            due_date: Some(now + Duration::days(self.due_in_days)),
            assignee_id: Some(self.assignee.id.clone()),
            project_id: self.project_id.to_string(),
            progress: self.progress,
            created_by: self.assignee.id.clone(),
            created_at: now,
            updated_at: now,
            subtasks: self
                .subtasks
                .iter()
                .map(|(id, title, completed)| SubtaskRow {
                    id: id.to_string(),
                    task_id: self.id.to_string(),
                    title: title.to_string(),
                    completed: *completed,
                    created_at: now,
                })
                .collect(),
            tags: self.tags.iter().map(|t| t.to_string()).collect(),
            assignee: Some(self.assignee),
        }
    }
}

/// The four sample tasks, dated relative to `now`
pub fn demo_tasks(now: DateTime<Utc>) -> Vec<TaskWithDetails> {
    vec![
        DemoTask {
            id: "demo-task-1",
            title: "Design Homepage Layout",
            description: "Create wireframes and mockups for the new homepage design",
            status: TaskStatus::InProgress,
            priority: TaskPriority::High,
            due_in_days: 7,
            project_id: DEMO_PROJECT_1,
            assignee: john(),
            progress: 0.5,
            subtasks: &[
                ("demo-subtask-1", "Create wireframes", true),
                ("demo-subtask-2", "Design mockups", false),
            ],
            tags: &["design", "frontend"],
        },
        DemoTask {
            id: "demo-task-2",
            title: "Implement User Authentication",
            description: "Set up user registration, login, and session management",
            status: TaskStatus::Todo,
            priority: TaskPriority::High,
            due_in_days: 14,
            project_id: DEMO_PROJECT_1,
            assignee: jane(),
            progress: 0.0,
            subtasks: &[],
            tags: &["backend", "security"],
        },
        DemoTask {
            id: "demo-task-3",
            title: "Database Schema Design",
            description: "Design and implement the database schema for the application",
            status: TaskStatus::Done,
            priority: TaskPriority::Medium,
            due_in_days: -3,
            project_id: DEMO_PROJECT_1,
            assignee: john(),
            progress: 1.0,
            subtasks: &[],
            tags: &["database", "backend"],
        },
        DemoTask {
            id: "demo-task-4",
            title: "Mobile App Testing",
            description: "Conduct comprehensive testing on mobile devices",
            status: TaskStatus::InProgress,
            priority: TaskPriority::Medium,
            due_in_days: 10,
            project_id: DEMO_PROJECT_2,
            assignee: jane(),
            progress: 0.3,
            subtasks: &[],
            tags: &["testing", "mobile"],
        },
    ]
    .into_iter()
    .map(|task| task.build(now))
    .collect()
}

/// The two sample projects, newest first
pub fn demo_projects(now: DateTime<Utc>) -> Vec<ProjectWithDetails> {
    [
        (
            DEMO_PROJECT_1,
            "TaskFlow Web Application",
            "Main web application for task and project management",
            "#3b82f6",
        ),
        (
            DEMO_PROJECT_2,
            "Mobile App Development",
            "Cross-platform mobile application development",
            "#10b981",
        ),
    ]
    .into_iter()
    .map(|(id, title, description, color)| ProjectWithDetails {
        id: id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        color: color.to_string(),
        owner_id: DEMO_USER_1.to_string(),
        created_at: now,
        updated_at: now,
        members: members(),
    })
    .collect()
}

/// Whether an id belongs to the demo dataset
pub fn is_demo_id(id: &str) -> bool {
    id.starts_with("demo-")
}
