//! Embedded local backend
//!
//! A SQLite-backed stand-in for the hosted backend-as-a-service with the same
//! table contract and auth semantics. Used when no hosted backend is
//! configured and as the backend behind the test suites.
//!
//! Differences from the hosted backend worth knowing:
//! - sessions are held in memory and never expire
//! - the "create profile on signup" trigger can be switched off to exercise
//!   the client-side compensation path

pub mod repository;
pub mod schema;

pub use repository::Repository;
pub use schema::initialize_database;

use crate::error::{AppError, Result};
use crate::gateway::rows::*;
use crate::gateway::{AuthEvent, Gateway, AUTH_EVENT_CAPACITY};
use crate::validation::is_valid_email;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

const SALT_SIZE: usize = 16;

/// Argon2 memory cost in KiB. Kept low: this backend is for local use.
const HASH_MEMORY_KIB: u32 = 4096;
const HASH_ITERATIONS: u32 = 2;

/// Minimum password length the embedded auth subsystem accepts
const BACKEND_MIN_PASSWORD: usize = 6;

/// Build connection options shared by migration and application connections.
fn connect_options(db_path: &Path) -> std::result::Result<SqliteConnectOptions, sqlx::Error> {
    SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display())).map(
        |opts| {
            opts.create_if_missing(true)
                .busy_timeout(Duration::from_secs(5))
                .journal_mode(SqliteJournalMode::Wal)
                .foreign_keys(true)
        },
    )
}

/// Create and initialize a file-backed connection pool.
///
/// Migrations run on a dedicated single-connection pool that is closed
/// before the application pool opens, so every pooled connection sees the
/// final schema.
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::info!("Creating local backend pool at: {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let migration_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options(db_path)?)
        .await?;

    initialize_database(&migration_pool).await?;
    migration_pool.close().await;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options(db_path)?)
        .await?;

    tracing::info!("Local backend pool created successfully");

    Ok(pool)
}

/// Create an initialized in-memory pool.
///
/// An in-memory database lives and dies with its connection, so the pool
/// holds exactly one connection that is never recycled.
pub async fn create_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    initialize_database(&pool).await?;
    Ok(pool)
}

/// Local backend implementing the gateway contract
pub struct LocalBackend {
    repo: Repository,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
    hasher: Argon2<'static>,
    profile_trigger: bool,
}

impl LocalBackend {
    /// Create a backend over an initialized pool.
    ///
    /// With `profile_trigger` set, signup creates the profile row itself the
    /// way the hosted backend's trigger does.
    pub fn new(pool: SqlitePool, profile_trigger: bool) -> Result<Self> {
        let params = Params::new(HASH_MEMORY_KIB, HASH_ITERATIONS, 1, None)
            .map_err(|e| AppError::Generic(format!("Invalid hashing parameters: {}", e)))?;
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            repo: Repository::new(pool),
            session: RwLock::new(None),
            events,
            hasher: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            profile_trigger,
        })
    }

    /// Open (or create) the backend database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = create_pool(db_path).await?;
        Self::new(pool, true)
    }

    /// Fresh in-memory backend
    pub async fn in_memory(profile_trigger: bool) -> Result<Self> {
        let pool = create_memory_pool().await?;
        Self::new(pool, profile_trigger)
    }

    /// Repository access for seeding data behind the gateway
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Drop the current session without emitting an event, as if the token
    /// had expired on the server.
    pub async fn expire_session(&self) {
        *self.session.write().await = None;
        tracing::debug!("Local session expired");
    }

    fn hash_password(&self, password: &str) -> Result<String> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let salt_string = SaltString::encode_b64(&salt)
            .map_err(|e| AppError::Generic(format!("Salt encoding failed: {}", e)))?;

        let hash = self
            .hasher
            .hash_password(password.as_bytes(), &salt_string)
            .map_err(|e| AppError::Generic(format!("Password hashing failed: {}", e)))?;

        Ok(hash.to_string())
    }

    fn verify_password(&self, password: &str, stored: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(parsed) => self
                .hasher
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!("Stored password hash is unreadable: {}", e);
                false
            }
        }
    }

    async fn start_session(&self, user: AuthUser) -> AuthSession {
        let session = AuthSession {
            user,
            access_token: Uuid::new_v4().to_string(),
            expires_at: None,
        };
        *self.session.write().await = Some(session.clone());
        let _ = self.events.send(AuthEvent::SignedIn(session.user.clone()));
        session
    }

    /// Identity behind the session, or the error the hosted backend gives
    /// for requests without one
    async fn viewer(&self) -> Result<AuthUser> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.user.clone())
            .ok_or_else(|| AppError::backend("Auth session missing!", Some("session_not_found")))
    }
}

fn row_level_security(table: &str) -> AppError {
    AppError::backend(
        format!("new row violates row-level security policy for table \"{}\"", table),
        Some("42501"),
    )
}

#[async_trait]
impl Gateway for LocalBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let user = self.repo.find_user_by_email(email).await?;

        match user {
            Some(user) if self.verify_password(password, &user.password_hash) => {
                tracing::debug!("Local sign-in for {}", user.id);
                Ok(self
                    .start_session(AuthUser {
                        id: user.id,
                        email: user.email,
                    })
                    .await)
            }
            _ => Err(AppError::backend(
                "Invalid login credentials",
                Some("invalid_credentials"),
            )),
        }
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession> {
        if !is_valid_email(email) {
            return Err(AppError::backend(
                format!("Email address \"{}\" is invalid", email),
                Some("email_address_invalid"),
            ));
        }
        if password.chars().count() < BACKEND_MIN_PASSWORD {
            return Err(AppError::backend(
                "Password should be at least 6 characters.",
                Some("weak_password"),
            ));
        }
        if self.repo.find_user_by_email(email).await?.is_some() {
            return Err(AppError::backend(
                "User already registered",
                Some("user_already_exists"),
            ));
        }

        let hash = self.hash_password(password)?;
        let user = self.repo.create_user(email, &hash).await?;

        if self.profile_trigger {
            let name = email.split('@').next().unwrap_or(email).to_string();
            self.repo
                .create_profile(&NewProfile {
                    id: user.id.clone(),
                    email: user.email.clone(),
                    name,
                })
                .await?;
        }

        tracing::info!("Local signup for {}", user.id);

        Ok(self
            .start_session(AuthUser {
                id: user.id,
                email: user.email,
            })
            .await)
    }

    async fn sign_out(&self) -> Result<()> {
        *self.session.write().await = None;
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<()> {
        let viewer = self.viewer().await?;
        if new_password.chars().count() < BACKEND_MIN_PASSWORD {
            return Err(AppError::backend(
                "Password should be at least 6 characters.",
                Some("weak_password"),
            ));
        }

        let hash = self.hash_password(new_password)?;
        self.repo.set_password_hash(&viewer.id, &hash).await?;

        let _ = self.events.send(AuthEvent::UserUpdated(viewer));
        Ok(())
    }

    async fn current_user(&self) -> Result<Option<AuthUser>> {
        let Some(user) = self.session.read().await.as_ref().map(|s| s.user.clone()) else {
            return Ok(None);
        };

        // Account removed behind the session's back
        if self.repo.find_user(&user.id).await?.is_none() {
            return Err(AppError::backend("User from sub claim in JWT does not exist", Some("user_not_found")));
        }
        Ok(Some(user))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        self.viewer().await?;
        self.repo.get_profile(user_id).await
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<ProfileRow> {
        let viewer = self.viewer().await?;
        if viewer.id != profile.id {
            return Err(row_level_security("profiles"));
        }
        self.repo.create_profile(profile).await
    }

    async fn update_profile(
        &self,
        user_id: &str,
        patch: &ProfilePatch,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let viewer = self.viewer().await?;
        if viewer.id != user_id {
            return Err(row_level_security("profiles"));
        }
        self.repo.update_profile(user_id, patch, updated_at).await?;
        Ok(())
    }

    async fn owned_project_ids(&self, owner_id: &str, limit: usize) -> Result<Vec<String>> {
        self.viewer().await?;
        self.repo.owned_project_ids(owner_id, limit).await
    }

    async fn list_projects_with_members(&self, owner_id: &str) -> Result<Vec<ProjectJoinRow>> {
        self.viewer().await?;
        self.repo.list_projects_with_members(owner_id).await
    }

    async fn insert_project(&self, project: &NewProject) -> Result<ProjectRow> {
        let viewer = self.viewer().await?;
        if viewer.id != project.owner_id {
            return Err(row_level_security("projects"));
        }
        self.repo.create_project(project).await
    }

    async fn update_project(
        &self,
        id: &str,
        patch: &ProjectPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let viewer = self.viewer().await?;
        self.repo.update_project(&viewer.id, id, patch, updated_at).await?;
        Ok(())
    }

    async fn delete_project(&self, id: &str) -> Result<()> {
        let viewer = self.viewer().await?;
        self.repo.delete_project(&viewer.id, id).await?;
        Ok(())
    }

    async fn insert_member(&self, member: &NewProjectMember) -> Result<()> {
        let viewer = self.viewer().await?;
        if !self.repo.project_visible_to(&viewer.id, &member.project_id).await? {
            return Err(row_level_security("project_members"));
        }
        self.repo.add_member(member).await
    }

    async fn list_tasks_with_details(&self) -> Result<Vec<TaskJoinRow>> {
        let viewer = self.viewer().await?;
        self.repo.list_tasks_with_details(&viewer.id).await
    }

    async fn insert_task(&self, task: &NewTask) -> Result<TaskRow> {
        let viewer = self.viewer().await?;
        if !self.repo.project_visible_to(&viewer.id, &task.project_id).await? {
            return Err(row_level_security("tasks"));
        }
        self.repo.create_task(task).await
    }

    async fn update_task(
        &self,
        id: &str,
        patch: &TaskPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let viewer = self.viewer().await?;
        if let Some(project_id) = &patch.project_id {
            if !self.repo.project_visible_to(&viewer.id, project_id).await? {
                return Err(row_level_security("tasks"));
            }
        }
        self.repo.update_task(&viewer.id, id, patch, updated_at).await?;
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let viewer = self.viewer().await?;
        self.repo.delete_task(&viewer.id, id).await?;
        Ok(())
    }

    async fn delete_subtasks(&self, task_id: &str) -> Result<()> {
        let viewer = self.viewer().await?;
        if self.repo.task_visible_to(&viewer.id, task_id).await? {
            self.repo.delete_subtasks(task_id).await?;
        }
        Ok(())
    }

    async fn insert_subtasks(&self, subtasks: &[NewSubtask]) -> Result<()> {
        let viewer = self.viewer().await?;
        for subtask in subtasks {
            if !self.repo.task_visible_to(&viewer.id, &subtask.task_id).await? {
                return Err(row_level_security("subtasks"));
            }
        }
        self.repo.insert_subtasks(subtasks).await
    }

    async fn delete_tags(&self, task_id: &str) -> Result<()> {
        let viewer = self.viewer().await?;
        if self.repo.task_visible_to(&viewer.id, task_id).await? {
            self.repo.delete_tags(task_id).await?;
        }
        Ok(())
    }

    async fn insert_tags(&self, tags: &[NewTaskTag]) -> Result<()> {
        let viewer = self.viewer().await?;
        for tag in tags {
            if !self.repo.task_visible_to(&viewer.id, &tag.task_id).await? {
                return Err(row_level_security("task_tags"));
            }
        }
        self.repo.insert_tags(tags).await
    }
}
