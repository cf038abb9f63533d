//! Work items service
//!
//! Holds the denormalized tasks and projects of the signed-in identity, the
//! current project and view mode. Every mutation is followed by a full reload
//! from the backend; nothing is patched in place.
//!
//! When the backend rejects the session the service swaps in the demo dataset
//! and publishes `SessionEvent::Invalidated`. Any other failure leaves the
//! previous state untouched and lands in the `error` slot.

use crate::config::{DEFAULT_PROJECT_COLOR, DEFAULT_PROJECT_DESCRIPTION, DEFAULT_PROJECT_TITLE};
use crate::error::{classify, is_no_rows, AppError, ErrorClass, Result};
use crate::gateway::{
    AuthUser, Gateway, MemberRole, NewProject, NewProjectMember, NewSubtask, NewTask, NewTaskTag,
    ProjectPatch, ProjectRow,
};
use crate::models::{
    NewProjectInput, NewTaskInput, ProjectWithDetails, SubtaskInput, TaskUpdate, TaskWithDetails,
    ViewMode,
};
use crate::services::denormalize::{projects_from_rows, tasks_from_rows};
use crate::services::events::{SessionEvent, SessionEvents};
use crate::services::fallback::{demo_projects, demo_tasks};
use crate::services::preferences::{PreferencesService, WorkspacePreferences};
use crate::validation::clamp_progress;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Snapshot of the work items container
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkItemsState {
    pub tasks: Vec<TaskWithDetails>,
    pub projects: Vec<ProjectWithDetails>,
    pub current_project: Option<String>,
    pub view_mode: ViewMode,
    pub is_loading: bool,
    pub error: Option<String>,
    /// The lists hold the demo dataset, not backend data
    pub demo_mode: bool,
}

impl WorkItemsState {
    /// Tasks of the current project, or every task when none is selected
    pub fn visible_tasks(&self) -> Vec<&TaskWithDetails> {
        match self.selected_project() {
            Some(project) => self
                .tasks
                .iter()
                .filter(|t| t.project_id == project.id)
                .collect(),
            None => self.tasks.iter().collect(),
        }
    }

    fn selected_project(&self) -> Option<&ProjectWithDetails> {
        let id = self.current_project.as_deref()?;
        self.projects.iter().find(|p| p.id == id)
    }
}

/// What to show when a load fails because of the session
#[derive(Debug, Clone, Copy)]
enum Fallback {
    Tasks,
    Projects,
    Nothing,
}

/// Work items state container
#[derive(Clone)]
pub struct WorkItemsService {
    gateway: Arc<dyn Gateway>,
    state: Arc<RwLock<WorkItemsState>>,
    events: SessionEvents,
    preferences: Option<PreferencesService>,
}

impl WorkItemsService {
    pub fn new(gateway: Arc<dyn Gateway>, events: SessionEvents) -> Self {
        Self {
            gateway,
            state: Arc::new(RwLock::new(WorkItemsState::default())),
            events,
            preferences: None,
        }
    }

    /// Persist the current project and view mode through `preferences`
    pub fn with_preferences(mut self, preferences: PreferencesService) -> Self {
        self.preferences = Some(preferences);
        self
    }

    pub async fn state(&self) -> WorkItemsState {
        self.state.read().await.clone()
    }

    /// Selected project, if it is part of the loaded set
    pub async fn current_project(&self) -> Option<ProjectWithDetails> {
        self.state.read().await.selected_project().cloned()
    }

    pub async fn clear_error(&self) {
        self.state.write().await.error = None;
    }

    /// Restore the persisted project selection and view mode
    pub async fn restore(&self) {
        let Some(preferences) = &self.preferences else {
            return;
        };

        match preferences.load().await {
            Ok(prefs) => {
                let mut state = self.state.write().await;
                state.current_project = prefs.workspace.current_project;
                state.view_mode = prefs.workspace.view_mode;
            }
            Err(e) => tracing::warn!("Could not read workspace preferences: {}", e),
        }
    }

    // ===== Local setters =====

    pub async fn set_current_project(&self, project_id: Option<String>) {
        self.state.write().await.current_project = project_id;
        self.persist().await;
    }

    pub async fn set_view_mode(&self, mode: ViewMode) {
        self.state.write().await.view_mode = mode;
        self.persist().await;
    }

    // ===== Loads =====

    /// Load the owned projects. Selects the newest one when nothing valid is
    /// selected.
    pub async fn fetch_projects(&self) {
        self.begin().await;
        self.reload_projects(true).await;
        self.end().await;
    }

    /// Load the visible tasks, provisioning a first project for an identity
    /// that owns none.
    pub async fn fetch_tasks(&self) {
        self.begin().await;
        self.reload_tasks().await;
        self.end().await;
    }

    // ===== Task mutations =====

    pub async fn add_task(&self, input: NewTaskInput) {
        self.begin().await;
        match self.run_add_task(input).await {
            Ok(()) => self.reload_tasks().await,
            Err(e) => self.fail("Add task", e, Fallback::Nothing).await,
        }
        self.end().await;
    }

    pub async fn update_task(&self, id: &str, update: impl Into<TaskUpdate>) {
        self.begin().await;
        match self.run_update_task(id, update.into()).await {
            Ok(()) => self.reload_tasks().await,
            Err(e) => self.fail("Update task", e, Fallback::Nothing).await,
        }
        self.end().await;
    }

    pub async fn delete_task(&self, id: &str) {
        self.begin().await;
        match self.run_delete_task(id).await {
            Ok(()) => self.reload_tasks().await,
            Err(e) => self.fail("Delete task", e, Fallback::Nothing).await,
        }
        self.end().await;
    }

    // ===== Project mutations =====

    pub async fn add_project(&self, input: NewProjectInput) {
        self.begin().await;
        match self.run_add_project(input).await {
            Ok(()) => self.reload_projects(true).await,
            Err(e) => self.fail("Add project", e, Fallback::Nothing).await,
        }
        self.end().await;
    }

    pub async fn update_project(&self, id: &str, patch: ProjectPatch) {
        self.begin().await;
        match self.run_update_project(id, patch).await {
            Ok(()) => self.reload_projects(true).await,
            Err(e) => self.fail("Update project", e, Fallback::Nothing).await,
        }
        self.end().await;
    }

    /// Delete a project. Its tasks go with it. When it was the selected
    /// project the selection is cleared rather than moved.
    pub async fn delete_project(&self, id: &str) {
        self.begin().await;
        match self.run_delete_project(id).await {
            Ok(()) => {
                self.reload_projects(false).await;
                let cleared = {
                    let mut state = self.state.write().await;
                    let selected = state.current_project.as_deref() == Some(id);
                    if selected {
                        state.current_project = None;
                    }
                    state.tasks.retain(|t| t.project_id != id);
                    selected
                };
                if cleared {
                    self.persist().await;
                }
            }
            Err(e) => self.fail("Delete project", e, Fallback::Nothing).await,
        }
        self.end().await;
    }

    // ===== Internals =====

    async fn begin(&self) {
        let mut state = self.state.write().await;
        state.is_loading = true;
        state.error = None;
    }

    async fn end(&self) {
        self.state.write().await.is_loading = false;
    }

    async fn reload_projects(&self, auto_select: bool) {
        match self.load_projects().await {
            Ok(projects) => self.apply_projects(projects, auto_select).await,
            Err(e) => self.fail("Fetch projects", e, Fallback::Projects).await,
        }
    }

    async fn reload_tasks(&self) {
        match self.load_tasks().await {
            Ok((tasks, provisioned)) => {
                {
                    let mut state = self.state.write().await;
                    tracing::debug!("Loaded {} tasks", tasks.len());
                    state.tasks = tasks;
                    state.demo_mode = false;
                }
                if provisioned {
                    self.reload_projects(true).await;
                }
            }
            Err(e) => self.fail("Fetch tasks", e, Fallback::Tasks).await,
        }
    }

    async fn apply_projects(&self, projects: Vec<ProjectWithDetails>, auto_select: bool) {
        let selection_changed = {
            let mut state = self.state.write().await;
            tracing::debug!("Loaded {} projects", projects.len());
            state.projects = projects;
            state.demo_mode = false;

            let needs_selection = auto_select && state.selected_project().is_none();
            match state.projects.first().map(|p| p.id.clone()) {
                Some(first) if needs_selection => {
                    state.current_project = Some(first);
                    true
                }
                _ => false,
            }
        };

        if selection_changed {
            self.persist().await;
        }
    }

    /// Record a failure. Session failures on loads swap in the demo dataset
    /// and clear the error; every session failure invalidates the identity.
    async fn fail(&self, action: &str, err: AppError, fallback: Fallback) {
        let session_lost = classify(&err) == ErrorClass::Session;

        {
            let mut state = self.state.write().await;
            match fallback {
                Fallback::Tasks if session_lost => {
                    tracing::warn!("{} failed ({}), showing demo tasks", action, err);
                    state.tasks = demo_tasks(Utc::now());
                    state.error = None;
                    state.demo_mode = true;
                }
                Fallback::Projects if session_lost => {
                    tracing::warn!("{} failed ({}), showing demo projects", action, err);
                    state.projects = demo_projects(Utc::now());
                    state.current_project = state.projects.first().map(|p| p.id.clone());
                    state.error = None;
                    state.demo_mode = true;
                }
                _ => {
                    tracing::error!("{} failed: {}", action, err);
                    state.error = Some(err.to_string());
                }
            }
        }

        if session_lost {
            self.events.publish(SessionEvent::Invalidated);
        }
    }

    async fn require_user(&self) -> Result<AuthUser> {
        self.gateway
            .current_user()
            .await?
            .ok_or(AppError::NotAuthenticated)
    }

    async fn load_projects(&self) -> Result<Vec<ProjectWithDetails>> {
        let user = self.require_user().await?;

        let rows = match self.gateway.list_projects_with_members(&user.id).await {
            Ok(rows) => rows,
            Err(e) if is_no_rows(&e) => Vec::new(),
            Err(e) => return Err(e),
        };

        Ok(projects_from_rows(rows))
    }

    /// Returns the tasks and whether a first project was created
    async fn load_tasks(&self) -> Result<(Vec<TaskWithDetails>, bool)> {
        let user = self.require_user().await?;
        // A failed first-run provisioning must not hide tasks of shared projects
        let provisioned = match self.ensure_first_project(&user).await {
            Ok(provisioned) => provisioned,
            Err(e) if classify(&e) == ErrorClass::Session => return Err(e),
            Err(e) => {
                tracing::warn!("Default project provisioning failed for {}: {}", user.id, e);
                false
            }
        };

        let rows = match self.gateway.list_tasks_with_details().await {
            Ok(rows) => rows,
            Err(e) if is_no_rows(&e) => Vec::new(),
            Err(e) => return Err(e),
        };

        Ok((tasks_from_rows(rows), provisioned))
    }

    /// Create the default project when `user` owns none. Acts only when the
    /// owned count is exactly zero, so repeated loads provision once.
    async fn ensure_first_project(&self, user: &AuthUser) -> Result<bool> {
        if !self.gateway.owned_project_ids(&user.id, 1).await?.is_empty() {
            return Ok(false);
        }

        tracing::info!("No projects owned by {}, creating the default project", user.id);
        self.create_owned_project(
            user,
            NewProject {
                title: DEFAULT_PROJECT_TITLE.to_string(),
                description: DEFAULT_PROJECT_DESCRIPTION.to_string(),
                color: DEFAULT_PROJECT_COLOR.to_string(),
                owner_id: user.id.clone(),
            },
        )
        .await?;

        Ok(true)
    }

    /// Insert a project, then its owner membership. The two writes are not
    /// atomic: a failed membership insert leaves the project without one.
    async fn create_owned_project(&self, user: &AuthUser, project: NewProject) -> Result<ProjectRow> {
        let project = self.gateway.insert_project(&project).await?;

        let member = NewProjectMember {
            project_id: project.id.clone(),
            user_id: user.id.clone(),
            role: MemberRole::Owner,
        };
        if let Err(e) = self.gateway.insert_member(&member).await {
            tracing::warn!(
                "Project {} created but owner membership failed, not rolling back: {}",
                project.id,
                e
            );
        }

        Ok(project)
    }

    async fn run_add_task(&self, input: NewTaskInput) -> Result<()> {
        let user = self.require_user().await?;

        let title = input.title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Task title is required".into()));
        }
        if input.project_id.trim().is_empty() {
            return Err(AppError::Validation("Select a project for the task".into()));
        }

        let task = NewTask {
            title: title.to_string(),
            description: input.description,
            status: input.status,
            priority: input.priority,
            start_date: input.start_date,
            due_date: input.due_date,
            assignee_id: input.assignee_id,
            project_id: input.project_id,
            progress: clamp_progress(input.progress)?,
            created_by: user.id,
        };

        let row = self.gateway.insert_task(&task).await?;
        tracing::info!("Created task {} in project {}", row.id, row.project_id);

        self.replace_children(&row.id, &input.subtasks, &input.tags)
            .await
    }

    async fn run_update_task(&self, id: &str, update: TaskUpdate) -> Result<()> {
        self.require_user().await?;

        let mut patch = update.patch;
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(AppError::Validation("Task title is required".into()));
            }
        }
        if let Some(progress) = patch.progress {
            patch.progress = Some(clamp_progress(progress)?);
        }

        self.gateway.update_task(id, &patch, Utc::now()).await?;
        tracing::info!("Updated task {}", id);

        self.replace_children(id, &update.subtasks, &update.tags)
            .await
    }

    async fn run_delete_task(&self, id: &str) -> Result<()> {
        self.require_user().await?;
        self.gateway.delete_task(id).await?;
        tracing::info!("Deleted task {}", id);
        Ok(())
    }

    async fn run_add_project(&self, input: NewProjectInput) -> Result<()> {
        let user = self.require_user().await?;

        let title = input.title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Project title is required".into()));
        }

        let project = NewProject {
            title: title.to_string(),
            description: input.description,
            color: input
                .color
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PROJECT_COLOR.to_string()),
            owner_id: user.id.clone(),
        };

        let row = self.create_owned_project(&user, project).await?;
        tracing::info!("Created project {}", row.id);
        Ok(())
    }

    async fn run_update_project(&self, id: &str, patch: ProjectPatch) -> Result<()> {
        self.require_user().await?;

        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(AppError::Validation("Project title is required".into()));
            }
        }

        self.gateway.update_project(id, &patch, Utc::now()).await?;
        tracing::info!("Updated project {}", id);
        Ok(())
    }

    async fn run_delete_project(&self, id: &str) -> Result<()> {
        self.require_user().await?;
        self.gateway.delete_project(id).await?;
        tracing::info!("Deleted project {}", id);
        Ok(())
    }

    /// Bulk-replace subtasks and tags. Empty collections leave the stored
    /// ones alone.
    async fn replace_children(
        &self,
        task_id: &str,
        subtasks: &[SubtaskInput],
        tags: &[String],
    ) -> Result<()> {
        if !subtasks.is_empty() {
            let rows: Vec<NewSubtask> = subtasks
                .iter()
                .filter(|s| !s.title.trim().is_empty())
                .map(|s| NewSubtask {
                    task_id: task_id.to_string(),
                    title: s.title.trim().to_string(),
                    completed: s.completed,
                })
                .collect();

            self.gateway.delete_subtasks(task_id).await?;
            if !rows.is_empty() {
                self.gateway.insert_subtasks(&rows).await?;
            }
        }

        if !tags.is_empty() {
            let mut seen = HashSet::new();
            let rows: Vec<NewTaskTag> = tags
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty() && seen.insert(t.to_string()))
                .map(|t| NewTaskTag {
                    task_id: task_id.to_string(),
                    tag: t.to_string(),
                })
                .collect();

            self.gateway.delete_tags(task_id).await?;
            if !rows.is_empty() {
                self.gateway.insert_tags(&rows).await?;
            }
        }

        Ok(())
    }

    async fn persist(&self) {
        let Some(preferences) = &self.preferences else {
            return;
        };

        let workspace = {
            let state = self.state.read().await;
            WorkspacePreferences {
                current_project: state.current_project.clone(),
                view_mode: state.view_mode,
            }
        };

        if let Err(e) = preferences.update_workspace(workspace).await {
            tracing::warn!("Failed to persist workspace preferences: {}", e);
        }
    }
}
