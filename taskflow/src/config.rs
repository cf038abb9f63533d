//! Application configuration
//!
//! Central location for configuration constants, validation boundaries,
//! and the backend connection settings read from the environment.

use crate::error::{AppError, Result};
use std::path::PathBuf;
use std::time::Duration;

// ===== Credential Rules =====

/// Minimum password length accepted by signup and password change
pub const MIN_PASSWORD_LENGTH: usize = 6;

// ===== First-Run Provisioning =====

/// Title of the project created for an identity that owns none
pub const DEFAULT_PROJECT_TITLE: &str = "My First Project";
pub const DEFAULT_PROJECT_DESCRIPTION: &str = "Welcome to TaskFlow! This is your first project.";
/// Display color for new projects when none is given
pub const DEFAULT_PROJECT_COLOR: &str = "#3b82f6";

// ===== Signup Profile Polling =====

/// Delay before the first profile re-check after signup.
/// Server-side profile triggers usually land within a couple of seconds.
pub const PROFILE_POLL_MIN_DELAY: Duration = Duration::from_millis(250);

/// Upper bound for a single backoff step
pub const PROFILE_POLL_MAX_DELAY: Duration = Duration::from_secs(2);

/// Number of re-checks before the client creates the profile itself
pub const PROFILE_POLL_ATTEMPTS: usize = 4;

// ===== Network =====

/// Default request timeout for the hosted backend
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ===== Local Files =====

/// Client-persisted state (identity snapshot, current project, view mode)
pub const PREFERENCES_FILE: &str = "taskflow-state.json";

/// Embedded backend database used when no hosted backend is configured
pub const LOCAL_DATABASE_FILE: &str = "taskflow.db";

pub const EXPORT_TASKS_FILE: &str = "taskflow-tasks.csv";
pub const EXPORT_PROJECTS_FILE: &str = "taskflow-projects.json";
pub const EXPORT_ALL_FILE: &str = "taskflow-all-data.json";

/// Polling bounds for the signup profile check
#[derive(Debug, Clone, Copy)]
pub struct ProfilePolling {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub attempts: usize,
}

impl Default for ProfilePolling {
    fn default() -> Self {
        Self {
            min_delay: PROFILE_POLL_MIN_DELAY,
            max_delay: PROFILE_POLL_MAX_DELAY,
            attempts: PROFILE_POLL_ATTEMPTS,
        }
    }
}

/// Where the client sends its requests
#[derive(Debug, Clone)]
pub enum BackendKind {
    /// Hosted backend-as-a-service reached over HTTP
    Hosted { url: String, anon_key: String },
    /// Embedded SQLite backend stored in the data directory
    Local,
}

/// Backend connection settings
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
}

impl BackendConfig {
    /// Read settings from `TASKFLOW_*` environment variables.
    ///
    /// Hosted mode needs both `TASKFLOW_BACKEND_URL` and `TASKFLOW_ANON_KEY`;
    /// a URL without a key is a configuration error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("TASKFLOW_BACKEND_URL").filter(|v| !v.trim().is_empty());
        let key = lookup("TASKFLOW_ANON_KEY").filter(|v| !v.trim().is_empty());

        let kind = match (url, key) {
            (Some(url), Some(anon_key)) => BackendKind::Hosted {
                url: url.trim_end_matches('/').to_string(),
                anon_key,
            },
            (Some(_), None) => {
                return Err(AppError::Config(
                    "TASKFLOW_BACKEND_URL is set but TASKFLOW_ANON_KEY is missing".to_string(),
                ))
            }
            _ => BackendKind::Local,
        };

        let data_dir = lookup("TASKFLOW_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".taskflow"));

        let timeout_secs = match lookup("TASKFLOW_REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                AppError::Config(format!("Invalid TASKFLOW_REQUEST_TIMEOUT_SECS: {}", raw))
            })?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        Ok(Self {
            kind,
            data_dir,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
