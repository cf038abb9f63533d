//! Shared test fixtures
//!
//! `FaultyGateway` wraps the embedded backend, counts calls per operation
//! and fails chosen operations with a scripted backend error.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskflow::config::ProfilePolling;
use taskflow::error::{AppError, Result};
use taskflow::gateway::*;
use taskflow::local::LocalBackend;
use taskflow::services::{IdentityService, SessionEvents, WorkItemsService};
use tokio::sync::broadcast;

#[derive(Clone)]
struct Fault {
    message: String,
    code: Option<String>,
}

pub struct FaultyGateway {
    inner: Arc<LocalBackend>,
    faults: Mutex<HashMap<&'static str, Fault>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl FaultyGateway {
    pub async fn new(profile_trigger: bool) -> Arc<Self> {
        let inner = LocalBackend::in_memory(profile_trigger)
            .await
            .expect("in-memory backend");
        Arc::new(Self {
            inner: Arc::new(inner),
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        })
    }

    pub fn backend(&self) -> &LocalBackend {
        &self.inner
    }

    /// Fail every future call to `op` with a backend error
    pub fn fail(&self, op: &'static str, message: &str, code: Option<&str>) {
        self.faults.lock().unwrap().insert(
            op,
            Fault {
                message: message.to_string(),
                code: code.map(str::to_string),
            },
        );
    }

    pub fn heal(&self, op: &'static str) {
        self.faults.lock().unwrap().remove(op);
    }

    pub fn calls(&self, op: &'static str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    fn enter(&self, op: &'static str) -> Result<()> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
        match self.faults.lock().unwrap().get(op) {
            Some(fault) => Err(AppError::backend(
                fault.message.clone(),
                fault.code.as_deref(),
            )),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Gateway for FaultyGateway {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        self.enter("sign_in")?;
        self.inner.sign_in(email, password).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession> {
        self.enter("sign_up")?;
        self.inner.sign_up(email, password).await
    }

    async fn sign_out(&self) -> Result<()> {
        self.enter("sign_out")?;
        self.inner.sign_out().await
    }

    async fn update_password(&self, new_password: &str) -> Result<()> {
        self.enter("update_password")?;
        self.inner.update_password(new_password).await
    }

    async fn current_user(&self) -> Result<Option<AuthUser>> {
        self.enter("current_user")?;
        self.inner.current_user().await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.subscribe()
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        self.enter("fetch_profile")?;
        self.inner.fetch_profile(user_id).await
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<ProfileRow> {
        self.enter("insert_profile")?;
        self.inner.insert_profile(profile).await
    }

    async fn update_profile(
        &self,
        user_id: &str,
        patch: &ProfilePatch,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.enter("update_profile")?;
        self.inner.update_profile(user_id, patch, updated_at).await
    }

    async fn owned_project_ids(&self, owner_id: &str, limit: usize) -> Result<Vec<String>> {
        self.enter("owned_project_ids")?;
        self.inner.owned_project_ids(owner_id, limit).await
    }

    async fn list_projects_with_members(&self, owner_id: &str) -> Result<Vec<ProjectJoinRow>> {
        self.enter("list_projects_with_members")?;
        self.inner.list_projects_with_members(owner_id).await
    }

    async fn insert_project(&self, project: &NewProject) -> Result<ProjectRow> {
        self.enter("insert_project")?;
        self.inner.insert_project(project).await
    }

    async fn update_project(
        &self,
        id: &str,
        patch: &ProjectPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.enter("update_project")?;
        self.inner.update_project(id, patch, updated_at).await
    }

    async fn delete_project(&self, id: &str) -> Result<()> {
        self.enter("delete_project")?;
        self.inner.delete_project(id).await
    }

    async fn insert_member(&self, member: &NewProjectMember) -> Result<()> {
        self.enter("insert_member")?;
        self.inner.insert_member(member).await
    }

    async fn list_tasks_with_details(&self) -> Result<Vec<TaskJoinRow>> {
        self.enter("list_tasks_with_details")?;
        self.inner.list_tasks_with_details().await
    }

    async fn insert_task(&self, task: &NewTask) -> Result<TaskRow> {
        self.enter("insert_task")?;
        self.inner.insert_task(task).await
    }

    async fn update_task(
        &self,
        id: &str,
        patch: &TaskPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.enter("update_task")?;
        self.inner.update_task(id, patch, updated_at).await
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        self.enter("delete_task")?;
        self.inner.delete_task(id).await
    }

    async fn delete_subtasks(&self, task_id: &str) -> Result<()> {
        self.enter("delete_subtasks")?;
        self.inner.delete_subtasks(task_id).await
    }

    async fn insert_subtasks(&self, subtasks: &[NewSubtask]) -> Result<()> {
        self.enter("insert_subtasks")?;
        self.inner.insert_subtasks(subtasks).await
    }

    async fn delete_tags(&self, task_id: &str) -> Result<()> {
        self.enter("delete_tags")?;
        self.inner.delete_tags(task_id).await
    }

    async fn insert_tags(&self, tags: &[NewTaskTag]) -> Result<()> {
        self.enter("insert_tags")?;
        self.inner.insert_tags(tags).await
    }
}

pub fn fast_polling() -> ProfilePolling {
    ProfilePolling {
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        attempts: 2,
    }
}

/// Both containers over one gateway and one session bus
pub struct Harness {
    pub gateway: Arc<FaultyGateway>,
    pub events: SessionEvents,
    pub identity: IdentityService,
    pub work_items: WorkItemsService,
}

impl Harness {
    pub async fn new(profile_trigger: bool) -> Self {
        let gateway = FaultyGateway::new(profile_trigger).await;
        let events = SessionEvents::new();
        let identity = IdentityService::new(gateway.clone(), events.clone())
            .with_polling(fast_polling());
        let work_items = WorkItemsService::new(gateway.clone(), events.clone());

        Self {
            gateway,
            events,
            identity,
            work_items,
        }
    }

    /// Harness with a signed-up identity
    pub async fn signed_in() -> Self {
        let harness = Self::new(true).await;
        harness.identity.signup("ada@example.com", "secret1").await;
        assert!(harness.identity.state().await.user.is_some());
        harness
    }
}

/// Poll `check` until it holds or a second passes
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
