//! Row-to-view-model mapping
//!
//! Pure functions from joined wire rows to the denormalized shapes the
//! containers hold. Absent embeds become empty collections.

use crate::gateway::rows::{MemberJoinRow, ProjectJoinRow, TaskJoinRow};
use crate::models::{Assignee, Member, ProjectWithDetails, TaskWithDetails};

pub fn task_from_row(row: TaskJoinRow) -> TaskWithDetails {
    let TaskJoinRow {
        task,
        subtasks,
        task_tags,
        assignee,
    } = row;

    TaskWithDetails {
        id: task.id,
        title: task.title,
        description: task.description,
        status: task.status,
        priority: task.priority,
        start_date: task.start_date,
        due_date: task.due_date,
        assignee_id: task.assignee_id,
        project_id: task.project_id,
        progress: task.progress,
        created_by: task.created_by,
        created_at: task.created_at,
        updated_at: task.updated_at,
        subtasks: subtasks.unwrap_or_default(),
        tags: task_tags
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.tag)
            .collect(),
        assignee: assignee.map(|a| Assignee {
            id: a.id,
            name: a.name,
            avatar_url: a.avatar_url,
        }),
    }
}

pub fn tasks_from_rows(rows: Vec<TaskJoinRow>) -> Vec<TaskWithDetails> {
    rows.into_iter().map(task_from_row).collect()
}

/// Membership rows whose profile is missing are skipped; there is nothing
/// to show for them.
fn member_from_row(row: MemberJoinRow) -> Option<Member> {
    row.user.map(|user| Member {
        id: user.id,
        name: user.name,
        avatar_url: user.avatar_url,
        role: row.role,
    })
}

pub fn project_from_row(row: ProjectJoinRow) -> ProjectWithDetails {
    let ProjectJoinRow {
        project,
        project_members,
    } = row;

    ProjectWithDetails {
        id: project.id,
        title: project.title,
        description: project.description,
        color: project.color,
        owner_id: project.owner_id,
        created_at: project.created_at,
        updated_at: project.updated_at,
        members: project_members
            .unwrap_or_default()
            .into_iter()
            .filter_map(member_from_row)
            .collect(),
    }
}

pub fn projects_from_rows(rows: Vec<ProjectJoinRow>) -> Vec<ProjectWithDetails> {
    rows.into_iter().map(project_from_row).collect()
}
