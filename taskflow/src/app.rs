//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are constructed here, share one gateway and one session
//! bus, and are disposed through `AppState::shutdown`.

use crate::config::{BackendConfig, BackendKind, LOCAL_DATABASE_FILE};
use crate::error::Result;
use crate::gateway::{Gateway, RestGateway};
use crate::local::LocalBackend;
use crate::services::{
    IdentityService, PreferencesService, SessionEvents, WorkItemsService,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub gateway: Arc<dyn Gateway>,
    pub events: SessionEvents,
    pub preferences: PreferencesService,
    pub identity: IdentityService,
    pub work_items: WorkItemsService,
    listeners: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AppState {
    /// Wire the services over an existing gateway
    pub fn new(gateway: Arc<dyn Gateway>, data_dir: PathBuf) -> Self {
        let events = SessionEvents::new();
        let preferences = PreferencesService::new(data_dir.clone());

        let identity = IdentityService::new(gateway.clone(), events.clone())
            .with_preferences(preferences.clone());
        let work_items = WorkItemsService::new(gateway.clone(), events.clone())
            .with_preferences(preferences.clone());

        Self {
            data_dir,
            gateway,
            events,
            preferences,
            identity,
            work_items,
            listeners: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the identity listeners and restore persisted client state
    pub async fn start(&self) {
        let mut listeners = self.listeners.lock().await;
        if listeners.is_none() {
            *listeners = Some(self.identity.spawn_listeners());
        }
        drop(listeners);

        self.identity.restore().await;
        self.work_items.restore().await;
    }

    /// Stop the background listeners. Safe to call more than once.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.listeners.lock().await.take() {
            handle.abort();
            tracing::info!("Application shut down");
        }
    }
}

/// Application setup - builds the gateway the configuration asks for
pub async fn setup(config: &BackendConfig) -> Result<AppState> {
    tracing::info!("Initializing application");
    tracing::info!("Data directory: {:?}", config.data_dir);

    tokio::fs::create_dir_all(&config.data_dir).await?;

    let gateway: Arc<dyn Gateway> = match &config.kind {
        BackendKind::Hosted { url, anon_key } => {
            tracing::info!("Using hosted backend at {}", url);
            Arc::new(RestGateway::new(url, anon_key, config.request_timeout)?)
        }
        BackendKind::Local => {
            let db_path = config.data_dir.join(LOCAL_DATABASE_FILE);
            tracing::info!("Using local backend at {:?}", db_path);
            Arc::new(LocalBackend::open(&db_path).await?)
        }
    };

    let state = AppState::new(gateway, config.data_dir.clone());
    state.start().await;

    tracing::info!("Application initialized successfully");

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_REQUEST_TIMEOUT_SECS;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_setup_local_backend_creates_files() {
        let temp = TempDir::new().unwrap();
        let config = BackendConfig {
            kind: BackendKind::Local,
            data_dir: temp.path().join("data"),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        };

        let state = setup(&config).await.unwrap();

        assert!(config.data_dir.join(LOCAL_DATABASE_FILE).exists());
        assert!(state.identity.state().await.user.is_none());

        state.shutdown().await;
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_signed_in_flow_over_local_backend() {
        let temp = TempDir::new().unwrap();
        let backend = Arc::new(LocalBackend::in_memory(true).await.unwrap());
        let state = AppState::new(backend, temp.path().to_path_buf());
        state.start().await;

        state.identity.signup("ada@example.com", "secret1").await;
        state.work_items.fetch_tasks().await;

        let items = state.work_items.state().await;
        assert_eq!(items.projects.len(), 1);
        assert!(!items.demo_mode);

        state.shutdown().await;
    }
}
