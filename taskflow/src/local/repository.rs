//! Repository layer for the local backend
//!
//! Plain SQL over the backend tables. Visibility rules that the hosted
//! backend enforces with row-level security are expressed here as explicit
//! `viewer_id` filters.

use crate::error::Result;
use crate::gateway::rows::*;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

/// Tasks a viewer may see: those in projects they own or belong to
const VISIBLE_TASKS: &str = r#"
    (t.project_id IN (SELECT id FROM projects WHERE owner_id = ?)
     OR t.project_id IN (SELECT project_id FROM project_members WHERE user_id = ?))
"#;

/// Stored account with its password hash
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub password_hash: String,
}

/// Repository for local backend operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ===== Users =====

    pub async fn create_user(&self, email: &str, password_hash: &str) -> Result<UserRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, email, password_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, email, password_hash
            "#,
        )
        .bind(&id)
        .bind(email)
        .bind(password_hash)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created user: {}", id);
        Ok(user)
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(
            "SELECT id, email, password_hash FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn find_user(&self, id: &str) -> Result<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(
            "SELECT id, email, password_hash FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn set_password_hash(&self, id: &str, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::debug!("Updated password for user: {}", id);
        Ok(())
    }

    // ===== Profiles =====

    pub async fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        let profile = sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(profile)
    }

    pub async fn create_profile(&self, req: &NewProfile) -> Result<ProfileRow> {
        let now = Utc::now();

        let profile = sqlx::query_as::<_, ProfileRow>(
            r#"
            INSERT INTO profiles (id, email, name, avatar_url, created_at, updated_at)
            VALUES (?, ?, ?, NULL, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&req.id)
        .bind(&req.email)
        .bind(&req.name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created profile: {}", req.id);
        Ok(profile)
    }

    pub async fn update_profile(
        &self,
        id: &str,
        patch: &ProfilePatch,
        updated_at: DateTime<Utc>,
    ) -> Result<u64> {
        let rows = sqlx::query(
            r#"
            UPDATE profiles SET
                name = COALESCE(?, name),
                avatar_url = CASE WHEN ? THEN ? ELSE avatar_url END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&patch.name)
        .bind(patch.avatar_url.is_some())
        .bind(patch.avatar_url.clone().flatten())
        .bind(updated_at)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    // ===== Projects =====

    pub async fn owned_project_ids(&self, owner_id: &str, limit: usize) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM projects WHERE owner_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(owner_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Projects owned by `owner_id`, newest first, with membership joined to profiles
    pub async fn list_projects_with_members(&self, owner_id: &str) -> Result<Vec<ProjectJoinRow>> {
        let projects = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT * FROM projects
            WHERE owner_id = ?
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let member_rows = sqlx::query(
            r#"
            SELECT pm.project_id, pm.role, pm.user_id, p.name, p.avatar_url
            FROM project_members pm
            JOIN projects pr ON pr.id = pm.project_id
            LEFT JOIN profiles p ON p.id = pm.user_id
            WHERE pr.owner_id = ?
            ORDER BY pm.rowid
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut members: HashMap<String, Vec<MemberJoinRow>> = HashMap::new();
        for row in member_rows {
            let project_id: String = row.try_get("project_id")?;
            let role: String = row.try_get("role")?;
            let role = role
                .parse::<MemberRole>()
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
            let name: Option<String> = row.try_get("name")?;

            // A member without a profile row embeds as null, like the hosted join
            let user = match name {
                Some(name) => Some(ProfileSummary {
                    id: row.try_get("user_id")?,
                    name,
                    avatar_url: row.try_get("avatar_url")?,
                }),
                None => None,
            };

            members
                .entry(project_id)
                .or_default()
                .push(MemberJoinRow { role, user });
        }

        Ok(projects
            .into_iter()
            .map(|project| {
                let project_members = Some(members.remove(&project.id).unwrap_or_default());
                ProjectJoinRow {
                    project,
                    project_members,
                }
            })
            .collect())
    }

    pub async fn create_project(&self, req: &NewProject) -> Result<ProjectRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let project = sqlx::query_as::<_, ProjectRow>(
            r#"
            INSERT INTO projects (id, title, description, color, owner_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&req.title)
        .bind(&req.description)
        .bind(&req.color)
        .bind(&req.owner_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created project: {}", id);
        Ok(project)
    }

    /// Update a project the viewer owns. Returns affected rows.
    pub async fn update_project(
        &self,
        viewer_id: &str,
        id: &str,
        patch: &ProjectPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<u64> {
        let rows = sqlx::query(
            r#"
            UPDATE projects SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                color = COALESCE(?, color),
                updated_at = ?
            WHERE id = ? AND owner_id = ?
            "#,
        )
        .bind(&patch.title)
        .bind(&patch.description)
        .bind(&patch.color)
        .bind(updated_at)
        .bind(id)
        .bind(viewer_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    /// Delete a project the viewer owns; membership, tasks, subtasks and tags cascade
    pub async fn delete_project(&self, viewer_id: &str, id: &str) -> Result<u64> {
        let rows = sqlx::query("DELETE FROM projects WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(viewer_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::debug!("Deleted project: {} ({} rows)", id, rows);
        Ok(rows)
    }

    pub async fn add_member(&self, req: &NewProjectMember) -> Result<()> {
        sqlx::query("INSERT INTO project_members (project_id, user_id, role) VALUES (?, ?, ?)")
            .bind(&req.project_id)
            .bind(&req.user_id)
            .bind(req.role.as_str())
            .execute(&self.pool)
            .await?;

        tracing::debug!("Added {} to project {} as {}", req.user_id, req.project_id, req.role);
        Ok(())
    }

    /// Whether the viewer owns or belongs to the project
    pub async fn project_visible_to(&self, viewer_id: &str, project_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM projects
            WHERE id = ?
              AND (owner_id = ?
                   OR id IN (SELECT project_id FROM project_members WHERE user_id = ?))
            "#,
        )
        .bind(project_id)
        .bind(viewer_id)
        .bind(viewer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    // ===== Tasks =====

    /// Tasks visible to the viewer, newest first, with subtasks, tags and assignee
    pub async fn list_tasks_with_details(&self, viewer_id: &str) -> Result<Vec<TaskJoinRow>> {
        let tasks = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT t.* FROM tasks t WHERE {} ORDER BY t.created_at DESC, t.rowid DESC",
            VISIBLE_TASKS
        ))
        .bind(viewer_id)
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?;

        let subtask_rows = sqlx::query_as::<_, SubtaskRow>(&format!(
            r#"
            SELECT s.* FROM subtasks s
            JOIN tasks t ON t.id = s.task_id
            WHERE {}
            ORDER BY s.created_at, s.rowid
            "#,
            VISIBLE_TASKS
        ))
        .bind(viewer_id)
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?;

        let tag_rows = sqlx::query_as::<_, TaskTagRow>(&format!(
            r#"
            SELECT tt.id, tt.task_id, tt.tag FROM task_tags tt
            JOIN tasks t ON t.id = tt.task_id
            WHERE {}
            ORDER BY tt.rowid
            "#,
            VISIBLE_TASKS
        ))
        .bind(viewer_id)
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?;

        let assignee_rows = sqlx::query_as::<_, ProfileSummary>(&format!(
            r#"
            SELECT p.id, p.name, p.avatar_url FROM profiles p
            WHERE p.id IN (SELECT t.assignee_id FROM tasks t WHERE {})
            "#,
            VISIBLE_TASKS
        ))
        .bind(viewer_id)
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?;

        let mut subtasks: HashMap<String, Vec<SubtaskRow>> = HashMap::new();
        for subtask in subtask_rows {
            subtasks.entry(subtask.task_id.clone()).or_default().push(subtask);
        }

        let mut tags: HashMap<String, Vec<TagOnly>> = HashMap::new();
        for row in tag_rows {
            tags.entry(row.task_id).or_default().push(TagOnly { tag: row.tag });
        }

        let assignees: HashMap<String, ProfileSummary> = assignee_rows
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        Ok(tasks
            .into_iter()
            .map(|task| TaskJoinRow {
                subtasks: Some(subtasks.remove(&task.id).unwrap_or_default()),
                task_tags: Some(tags.remove(&task.id).unwrap_or_default()),
                assignee: task
                    .assignee_id
                    .as_ref()
                    .and_then(|id| assignees.get(id).cloned()),
                task,
            })
            .collect())
    }

    pub async fn create_task(&self, req: &NewTask) -> Result<TaskRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let task = sqlx::query_as::<_, TaskRow>(
            r#"
            INSERT INTO tasks (
                id, title, description, status, priority, start_date, due_date,
                assignee_id, project_id, progress, created_by, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&req.title)
        .bind(&req.description)
        .bind(req.status.as_str())
        .bind(req.priority.as_str())
        .bind(req.start_date)
        .bind(req.due_date)
        .bind(&req.assignee_id)
        .bind(&req.project_id)
        .bind(req.progress)
        .bind(&req.created_by)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created task: {}", id);
        Ok(task)
    }

    /// Update a task visible to the viewer. Returns affected rows.
    pub async fn update_task(
        &self,
        viewer_id: &str,
        id: &str,
        patch: &TaskPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<u64> {
        // Nullable columns carry a "touched" flag so Some(None) can clear them
        let sql = format!(
            r#"
            UPDATE tasks AS t SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                status = COALESCE(?, status),
                priority = COALESCE(?, priority),
                start_date = CASE WHEN ? THEN ? ELSE start_date END,
                due_date = CASE WHEN ? THEN ? ELSE due_date END,
                assignee_id = CASE WHEN ? THEN ? ELSE assignee_id END,
                project_id = COALESCE(?, project_id),
                progress = COALESCE(?, progress),
                updated_at = ?
            WHERE t.id = ? AND {}
            "#,
            VISIBLE_TASKS
        );

        let rows = sqlx::query(&sql)
            .bind(&patch.title)
            .bind(&patch.description)
            .bind(patch.status.map(|s| s.as_str()))
            .bind(patch.priority.map(|p| p.as_str()))
            .bind(patch.start_date.is_some())
            .bind(patch.start_date.flatten())
            .bind(patch.due_date.is_some())
            .bind(patch.due_date.flatten())
            .bind(patch.assignee_id.is_some())
            .bind(patch.assignee_id.clone().flatten())
            .bind(&patch.project_id)
            .bind(patch.progress)
            .bind(updated_at)
            .bind(id)
            .bind(viewer_id)
            .bind(viewer_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::debug!("Updated task: {} ({} rows)", id, rows);
        Ok(rows)
    }

    pub async fn delete_task(&self, viewer_id: &str, id: &str) -> Result<u64> {
        let sql = format!("DELETE FROM tasks AS t WHERE t.id = ? AND {}", VISIBLE_TASKS);

        let rows = sqlx::query(&sql)
            .bind(id)
            .bind(viewer_id)
            .bind(viewer_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::debug!("Deleted task: {} ({} rows)", id, rows);
        Ok(rows)
    }

    pub async fn task_visible_to(&self, viewer_id: &str, task_id: &str) -> Result<bool> {
        let sql = format!("SELECT COUNT(*) FROM tasks t WHERE t.id = ? AND {}", VISIBLE_TASKS);

        let count: i64 = sqlx::query_scalar(&sql)
            .bind(task_id)
            .bind(viewer_id)
            .bind(viewer_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count > 0)
    }

    // ===== Subtasks and tags =====

    pub async fn delete_subtasks(&self, task_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM subtasks WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn insert_subtasks(&self, subtasks: &[NewSubtask]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for subtask in subtasks {
            sqlx::query(
                r#"
                INSERT INTO subtasks (id, task_id, title, completed, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&subtask.task_id)
            .bind(&subtask.title)
            .bind(subtask.completed)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_tags(&self, task_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM task_tags WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn insert_tags(&self, tags: &[NewTaskTag]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for tag in tags {
            sqlx::query("INSERT INTO task_tags (id, task_id, tag) VALUES (?, ?, ?)")
                .bind(Uuid::new_v4().to_string())
                .bind(&tag.task_id)
                .bind(&tag.tag)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::create_memory_pool;

    async fn create_test_repo() -> Repository {
        Repository::new(create_memory_pool().await.unwrap())
    }

    async fn seed_user(repo: &Repository, email: &str) -> UserRecord {
        let user = repo.create_user(email, "hash").await.unwrap();
        repo.create_profile(&NewProfile {
            id: user.id.clone(),
            email: email.to_string(),
            name: email.split('@').next().unwrap().to_string(),
        })
        .await
        .unwrap();
        user
    }

    async fn seed_project(repo: &Repository, owner: &UserRecord, title: &str) -> ProjectRow {
        let project = repo
            .create_project(&NewProject {
                title: title.to_string(),
                description: String::new(),
                color: "#10b981".to_string(),
                owner_id: owner.id.clone(),
            })
            .await
            .unwrap();
        repo.add_member(&NewProjectMember {
            project_id: project.id.clone(),
            user_id: owner.id.clone(),
            role: MemberRole::Owner,
        })
        .await
        .unwrap();
        project
    }

    fn new_task(project: &ProjectRow, creator: &UserRecord, title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: TaskPriority::High,
            start_date: None,
            due_date: None,
            assignee_id: Some(creator.id.clone()),
            project_id: project.id.clone(),
            progress: 0.0,
            created_by: creator.id.clone(),
        }
    }

    #[tokio::test]
    async fn test_projects_newest_first_with_members() {
        let repo = create_test_repo().await;
        let owner = seed_user(&repo, "owner@example.com").await;

        seed_project(&repo, &owner, "Older").await;
        seed_project(&repo, &owner, "Newer").await;

        let projects = repo.list_projects_with_members(&owner.id).await.unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].project.title, "Newer");

        let members = projects[0].project_members.as_ref().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, MemberRole::Owner);
        assert_eq!(members[0].user.as_ref().unwrap().name, "owner");
    }

    #[tokio::test]
    async fn test_task_join_collects_subtasks_tags_and_assignee() {
        let repo = create_test_repo().await;
        let owner = seed_user(&repo, "owner@example.com").await;
        let project = seed_project(&repo, &owner, "Launch").await;

        let task = repo
            .create_task(&new_task(&project, &owner, "Write copy"))
            .await
            .unwrap();

        repo.insert_subtasks(&[
            NewSubtask {
                task_id: task.id.clone(),
                title: "Draft".to_string(),
                completed: true,
            },
            NewSubtask {
                task_id: task.id.clone(),
                title: "Review".to_string(),
                completed: false,
            },
        ])
        .await
        .unwrap();
        repo.insert_tags(&[NewTaskTag {
            task_id: task.id.clone(),
            tag: "marketing".to_string(),
        }])
        .await
        .unwrap();

        let rows = repo.list_tasks_with_details(&owner.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subtasks.as_ref().unwrap().len(), 2);
        assert_eq!(rows[0].task_tags.as_ref().unwrap()[0].tag, "marketing");
        assert_eq!(rows[0].assignee.as_ref().unwrap().id, owner.id);
    }

    #[tokio::test]
    async fn test_tasks_hidden_from_outsiders() {
        let repo = create_test_repo().await;
        let owner = seed_user(&repo, "owner@example.com").await;
        let outsider = seed_user(&repo, "outsider@example.com").await;
        let project = seed_project(&repo, &owner, "Private").await;

        let task = repo
            .create_task(&new_task(&project, &owner, "Secret"))
            .await
            .unwrap();

        assert!(repo.list_tasks_with_details(&outsider.id).await.unwrap().is_empty());
        assert!(!repo.project_visible_to(&outsider.id, &project.id).await.unwrap());

        let deleted = repo.delete_task(&outsider.id, &task.id).await.unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_update_task_clears_nullable_columns() {
        let repo = create_test_repo().await;
        let owner = seed_user(&repo, "owner@example.com").await;
        let project = seed_project(&repo, &owner, "Launch").await;
        let task = repo
            .create_task(&new_task(&project, &owner, "Ship"))
            .await
            .unwrap();

        let patch = TaskPatch {
            status: Some(TaskStatus::Done),
            assignee_id: Some(None),
            progress: Some(1.0),
            ..Default::default()
        };
        let rows = repo
            .update_task(&owner.id, &task.id, &patch, Utc::now())
            .await
            .unwrap();
        assert_eq!(rows, 1);

        let rows = repo.list_tasks_with_details(&owner.id).await.unwrap();
        let updated = &rows[0].task;
        assert_eq!(updated.status, TaskStatus::Done);
        assert_eq!(updated.assignee_id, None);
        assert_eq!(updated.progress, 1.0);
        assert_eq!(updated.title, "Ship");
    }

    #[tokio::test]
    async fn test_progress_out_of_range_is_rejected_by_schema() {
        let repo = create_test_repo().await;
        let owner = seed_user(&repo, "owner@example.com").await;
        let project = seed_project(&repo, &owner, "Launch").await;

        let mut task = new_task(&project, &owner, "Overdone");
        task.progress = 1.4;

        assert!(repo.create_task(&task).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_project_cascades() {
        let repo = create_test_repo().await;
        let owner = seed_user(&repo, "owner@example.com").await;
        let project = seed_project(&repo, &owner, "Doomed").await;
        repo.create_task(&new_task(&project, &owner, "Orphan?"))
            .await
            .unwrap();

        let rows = repo.delete_project(&owner.id, &project.id).await.unwrap();
        assert_eq!(rows, 1);

        assert!(repo.list_tasks_with_details(&owner.id).await.unwrap().is_empty());
        assert!(repo.owned_project_ids(&owner.id, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_profile_patch() {
        let repo = create_test_repo().await;
        let user = seed_user(&repo, "someone@example.com").await;

        let patch = ProfilePatch {
            name: Some("Someone Else".to_string()),
            avatar_url: Some(Some("https://img.example.com/a.png".to_string())),
        };
        repo.update_profile(&user.id, &patch, Utc::now()).await.unwrap();

        let profile = repo.get_profile(&user.id).await.unwrap().unwrap();
        assert_eq!(profile.name, "Someone Else");
        assert_eq!(profile.avatar_url.as_deref(), Some("https://img.example.com/a.png"));
    }
}
