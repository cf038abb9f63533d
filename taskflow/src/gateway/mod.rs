//! Remote data gateway
//!
//! The one seam between the state containers and whatever backend holds the
//! data. Implementations surface backend failures unmodified as
//! `AppError::Backend` so that callers can classify them.

pub mod rest;
pub mod rows;

pub use rest::RestGateway;
pub use rows::*;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Auth state transitions pushed by the backend.
/// Sign-ins from another client and token refreshes arrive here too.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(AuthUser),
    SignedOut,
    TokenRefreshed(AuthUser),
    UserUpdated(AuthUser),
}

/// Capacity of the auth event channel kept by each gateway
pub(crate) const AUTH_EVENT_CAPACITY: usize = 32;

/// Request primitives against the backend tables and auth subsystem
#[async_trait]
pub trait Gateway: Send + Sync {
    // ===== Auth =====

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession>;

    async fn sign_out(&self) -> Result<()>;

    /// Change the password of the signed-in identity
    async fn update_password(&self, new_password: &str) -> Result<()>;

    /// Identity behind the current session, if any
    async fn current_user(&self) -> Result<Option<AuthUser>>;

    /// Subscribe to auth state changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    // ===== Profiles =====

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRow>>;

    async fn insert_profile(&self, profile: &NewProfile) -> Result<ProfileRow>;

    async fn update_profile(
        &self,
        user_id: &str,
        patch: &ProfilePatch,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    // ===== Projects =====

    /// Ids of projects owned by `owner_id`, at most `limit`
    async fn owned_project_ids(&self, owner_id: &str, limit: usize) -> Result<Vec<String>>;

    /// Projects owned by `owner_id`, newest first, with membership embedded
    async fn list_projects_with_members(&self, owner_id: &str) -> Result<Vec<ProjectJoinRow>>;

    async fn insert_project(&self, project: &NewProject) -> Result<ProjectRow>;

    async fn update_project(
        &self,
        id: &str,
        patch: &ProjectPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn delete_project(&self, id: &str) -> Result<()>;

    async fn insert_member(&self, member: &NewProjectMember) -> Result<()>;

    // ===== Tasks =====

    /// Tasks visible to the session, newest first, with embeds
    async fn list_tasks_with_details(&self) -> Result<Vec<TaskJoinRow>>;

    async fn insert_task(&self, task: &NewTask) -> Result<TaskRow>;

    async fn update_task(&self, id: &str, patch: &TaskPatch, updated_at: DateTime<Utc>)
        -> Result<()>;

    async fn delete_task(&self, id: &str) -> Result<()>;

    // ===== Subtasks and tags =====

    async fn delete_subtasks(&self, task_id: &str) -> Result<()>;

    async fn insert_subtasks(&self, subtasks: &[NewSubtask]) -> Result<()>;

    async fn delete_tags(&self, task_id: &str) -> Result<()>;

    async fn insert_tags(&self, tags: &[NewTaskTag]) -> Result<()>;
}
