//! Preferences service
//!
//! Persists client-side state across restarts using JSON file storage: the
//! identity snapshot and the workspace selection. Task and project lists are
//! never written here; they are always reloaded from the backend.

use crate::config::PREFERENCES_FILE;
use crate::error::{AppError, Result};
use crate::gateway::AuthUser;
use crate::models::{Profile, ViewMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

/// Last known identity, restored before the session is re-checked
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthSnapshot {
    #[serde(default)]
    pub user: Option<AuthUser>,
    #[serde(default)]
    pub profile: Option<Profile>,
}

/// Which project and view were in focus
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspacePreferences {
    #[serde(default)]
    pub current_project: Option<String>,
    #[serde(default)]
    pub view_mode: ViewMode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub auth: AuthSnapshot,
    #[serde(default)]
    pub workspace: WorkspacePreferences,
}

/// Service for reading and writing the preferences file
///
/// Clones share one lock, so concurrent section updates from the identity
/// and work-item services never overwrite each other.
#[derive(Clone)]
pub struct PreferencesService {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl PreferencesService {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            path: data_dir.join(PREFERENCES_FILE),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Load preferences from disk or create defaults if none exist
    pub async fn load(&self) -> Result<Preferences> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    pub async fn save(&self, prefs: &Preferences) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write(prefs).await
    }

    pub async fn update_auth(&self, auth: AuthSnapshot) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut prefs = self.read().await?;
        prefs.auth = auth;
        self.write(&prefs).await
    }

    pub async fn update_workspace(&self, workspace: WorkspacePreferences) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut prefs = self.read().await?;
        prefs.workspace = workspace;
        self.write(&prefs).await
    }

    async fn read(&self) -> Result<Preferences> {
        if !self.path.exists() {
            tracing::info!("Preferences file not found, creating defaults");
            let defaults = Preferences::default();
            self.write(&defaults).await?;
            return Ok(defaults);
        }

        let content = fs::read_to_string(&self.path).await?;
        let prefs: Preferences = serde_json::from_str(&content)
            .map_err(|e| AppError::Generic(format!("Failed to parse preferences: {}", e)))?;

        Ok(prefs)
    }

    /// Write to a sibling temp file, then rename it over the old one
    async fn write(&self, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(prefs)
            .map_err(|e| AppError::Generic(format!("Failed to serialize preferences: {}", e)))?;

        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, content).await?;
        fs::rename(&staging, &self.path).await?;
        tracing::debug!("Preferences saved to {:?}", self.path);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_service() -> (PreferencesService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let service = PreferencesService::new(temp_dir.path().to_path_buf());
        (service, temp_dir)
    }

    #[tokio::test]
    async fn test_defaults_created_on_load() {
        let (service, temp) = create_test_service();

        let prefs = service.load().await.unwrap();

        assert!(prefs.auth.user.is_none());
        assert!(prefs.workspace.current_project.is_none());
        assert_eq!(prefs.workspace.view_mode, ViewMode::List);
        assert!(temp.path().join(PREFERENCES_FILE).exists());
    }

    #[tokio::test]
    async fn test_workspace_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();

        {
            let service = PreferencesService::new(temp_dir.path().to_path_buf());
            service
                .update_workspace(WorkspacePreferences {
                    current_project: Some("p1".to_string()),
                    view_mode: ViewMode::Kanban,
                })
                .await
                .unwrap();
        }

        {
            let service = PreferencesService::new(temp_dir.path().to_path_buf());
            let prefs = service.load().await.unwrap();
            assert_eq!(prefs.workspace.current_project.as_deref(), Some("p1"));
            assert_eq!(prefs.workspace.view_mode, ViewMode::Kanban);
        }
    }

    #[tokio::test]
    async fn test_auth_update_keeps_workspace() {
        let (service, _temp) = create_test_service();

        service
            .update_workspace(WorkspacePreferences {
                current_project: None,
                view_mode: ViewMode::Gantt,
            })
            .await
            .unwrap();
        service
            .update_auth(AuthSnapshot {
                user: Some(AuthUser {
                    id: "u1".to_string(),
                    email: "ada@example.com".to_string(),
                }),
                profile: None,
            })
            .await
            .unwrap();

        let prefs = service.load().await.unwrap();
        assert_eq!(prefs.workspace.view_mode, ViewMode::Gantt);
        assert_eq!(prefs.auth.user.unwrap().id, "u1");
    }

    #[tokio::test]
    async fn test_missing_sections_fall_back_to_defaults() {
        let (service, temp) = create_test_service();
        std::fs::write(temp.path().join(PREFERENCES_FILE), "{}").unwrap();

        let prefs = service.load().await.unwrap();
        assert_eq!(prefs, Preferences::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_section_updates_both_survive() {
        let (service, temp) = create_test_service();

        for round in 0..25 {
            let auth = service.clone();
            let workspace = service.clone();
            let user_id = format!("u{}", round);
            let project_id = format!("p{}", round);

            let (a, w) = tokio::join!(
                tokio::spawn(async move {
                    auth.update_auth(AuthSnapshot {
                        user: Some(AuthUser {
                            id: user_id,
                            email: "ada@example.com".to_string(),
                        }),
                        profile: None,
                    })
                    .await
                }),
                tokio::spawn(async move {
                    workspace
                        .update_workspace(WorkspacePreferences {
                            current_project: Some(project_id),
                            view_mode: ViewMode::Kanban,
                        })
                        .await
                })
            );
            a.unwrap().unwrap();
            w.unwrap().unwrap();

            let prefs = service.load().await.unwrap();
            assert_eq!(prefs.auth.user.unwrap().id, format!("u{}", round));
            assert_eq!(
                prefs.workspace.current_project,
                Some(format!("p{}", round))
            );
        }

        let staging = temp.path().join(PREFERENCES_FILE).with_extension("json.tmp");
        assert!(!staging.exists());
    }
}
