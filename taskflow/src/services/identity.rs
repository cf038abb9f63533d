//! Identity service
//!
//! Holds the signed-in identity and its profile. Public operations never
//! return errors; failures land in the `error` slot of the state snapshot,
//! the way a form banner would show them.

use crate::config::ProfilePolling;
use crate::error::{
    classify, is_duplicate_account, is_invalid_email, is_no_rows, is_unconfirmed_email, AppError,
    ErrorClass, Result,
};
use crate::gateway::{AuthEvent, AuthUser, Gateway, NewProfile, ProfilePatch};
use crate::models::Profile;
use crate::services::events::{SessionEvent, SessionEvents};
use crate::services::preferences::{AuthSnapshot, PreferencesService};
use crate::services::retry::poll_until_some;
use crate::validation::{validate_credentials, validate_new_password, validate_signup};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

const INVALID_CREDENTIALS: &str = "Invalid email or password. Please check your credentials.";
const ACCOUNT_EXISTS: &str = "An account with this email already exists. Please sign in instead.";
const INVALID_EMAIL: &str = "Please enter a valid email address";
const WRONG_CURRENT_PASSWORD: &str = "Current password is incorrect";
const CONFIRM_EMAIL: &str = "Check your email to confirm your account, then sign in.";

/// Snapshot of the identity container
#[derive(Debug, Clone, Default, Serialize)]
pub struct IdentityState {
    pub user: Option<AuthUser>,
    pub profile: Option<Profile>,
    pub is_loading: bool,
    pub error: Option<String>,
    /// Signup finished but the profile row could not be found or created
    pub profile_degraded: bool,
}

/// Identity state container
#[derive(Clone)]
pub struct IdentityService {
    gateway: Arc<dyn Gateway>,
    state: Arc<RwLock<IdentityState>>,
    events: SessionEvents,
    preferences: Option<PreferencesService>,
    polling: ProfilePolling,
}

impl IdentityService {
    pub fn new(gateway: Arc<dyn Gateway>, events: SessionEvents) -> Self {
        Self {
            gateway,
            state: Arc::new(RwLock::new(IdentityState::default())),
            events,
            preferences: None,
            polling: ProfilePolling::default(),
        }
    }

    /// Persist the identity snapshot through `preferences`
    pub fn with_preferences(mut self, preferences: PreferencesService) -> Self {
        self.preferences = Some(preferences);
        self
    }

    pub fn with_polling(mut self, polling: ProfilePolling) -> Self {
        self.polling = polling;
        self
    }

    pub async fn state(&self) -> IdentityState {
        self.state.read().await.clone()
    }

    pub async fn current_user(&self) -> Option<AuthUser> {
        self.state.read().await.user.clone()
    }

    pub async fn clear_error(&self) {
        self.state.write().await.error = None;
    }

    // ===== Operations =====

    pub async fn login(&self, email: &str, password: &str) {
        self.begin().await;
        let result = self.run_login(email, password).await;
        self.finish("Login", result).await;
    }

    pub async fn signup(&self, email: &str, password: &str) {
        self.begin().await;
        let result = self.run_signup(email, password).await;
        self.finish("Signup", result).await;
    }

    /// Change the password after re-verifying the current one
    pub async fn update_password(&self, current_password: &str, new_password: &str) {
        self.begin().await;
        let result = self.run_update_password(current_password, new_password).await;
        self.finish("Password update", result).await;
    }

    pub async fn update_profile(&self, patch: ProfilePatch) {
        self.begin().await;
        let result = self.run_update_profile(patch).await;
        self.finish("Profile update", result).await;
    }

    /// Sign out and clear the local identity. The local identity is cleared
    /// even when the backend call fails. Safe to call repeatedly.
    pub async fn logout(&self) {
        if let Err(e) = self.gateway.sign_out().await {
            tracing::warn!("Sign-out request failed, clearing local identity anyway: {}", e);
        }

        let was_signed_in = self.clear_local().await;
        self.state.write().await.error = None;

        if was_signed_in {
            tracing::info!("Signed out");
            self.events.publish(SessionEvent::SignedOut);
        }
    }

    /// Reload the profile of the current identity. No-op when signed out.
    pub async fn fetch_profile(&self) {
        let Some(user) = self.current_user().await else {
            return;
        };

        if let Err(e) = self.refresh_profile(&user).await {
            tracing::error!("Profile fetch failed: {}", e);
            self.state.write().await.error = Some(e.to_string());
        }
    }

    /// Restore the persisted identity snapshot, then reconcile it with the
    /// session the gateway actually holds.
    pub async fn restore(&self) {
        if let Some(preferences) = &self.preferences {
            match preferences.load().await {
                Ok(prefs) => {
                    let mut state = self.state.write().await;
                    state.user = prefs.auth.user;
                    state.profile = prefs.auth.profile;
                }
                Err(e) => tracing::warn!("Could not read identity snapshot: {}", e),
            }
        }

        match self.gateway.current_user().await {
            Ok(Some(user)) => {
                if self.apply_user(user).await {
                    self.fetch_profile().await;
                }
            }
            Ok(None) => {
                self.clear_local().await;
            }
            Err(e) if classify(&e) == ErrorClass::Session => {
                tracing::info!("Stored session is no longer valid: {}", e);
                self.clear_local().await;
            }
            Err(e) => tracing::warn!("Could not verify session, keeping snapshot: {}", e),
        }
    }

    // ===== Push contract =====

    /// Apply an auth state change pushed by the gateway
    pub async fn handle_auth_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(user)
            | AuthEvent::TokenRefreshed(user)
            | AuthEvent::UserUpdated(user) => {
                if self.apply_user(user).await {
                    self.fetch_profile().await;
                }
            }
            AuthEvent::SignedOut => {
                if self.clear_local().await {
                    self.events.publish(SessionEvent::SignedOut);
                }
            }
        }
    }

    pub async fn handle_session_event(&self, event: SessionEvent) {
        if event == SessionEvent::Invalidated && self.current_user().await.is_some() {
            tracing::warn!("Session invalidated, logging out");
            self.logout().await;
        }
    }

    /// Start consuming gateway auth events and session bus events.
    /// Abort the returned handle to stop listening.
    pub fn spawn_listeners(&self) -> JoinHandle<()> {
        let service = self.clone();
        let mut auth_events = self.gateway.subscribe();
        let mut session_events = self.events.subscribe();

        tokio::spawn(async move {
            tracing::debug!("Identity listeners started");
            loop {
                tokio::select! {
                    event = auth_events.recv() => match event {
                        Ok(event) => service.handle_auth_event(event).await,
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!("Identity listener skipped {} auth events", n)
                        }
                        Err(RecvError::Closed) => break,
                    },
                    event = session_events.recv() => match event {
                        Ok(event) => service.handle_session_event(event).await,
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!("Identity listener skipped {} session events", n)
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("Identity listeners stopped");
        })
    }

    // ===== Internals =====

    async fn begin(&self) {
        let mut state = self.state.write().await;
        state.is_loading = true;
        state.error = None;
    }

    async fn finish(&self, action: &str, result: Result<()>) {
        let mut state = self.state.write().await;
        state.is_loading = false;
        if let Err(e) = result {
            tracing::error!("{} failed: {}", action, e);
            state.error = Some(e.to_string());
        }
    }

    async fn run_login(&self, email: &str, password: &str) -> Result<()> {
        let email = validate_credentials(email, password)?;

        let session = self
            .gateway
            .sign_in(&email, password)
            .await
            .map_err(|e| {
                if is_unconfirmed_email(&e) {
                    AppError::Authentication(CONFIRM_EMAIL.into())
                } else if classify(&e) == ErrorClass::Credentials {
                    AppError::Authentication(INVALID_CREDENTIALS.into())
                } else {
                    e
                }
            })?;

        tracing::info!("Signed in as {}", session.user.id);
        self.apply_user(session.user.clone()).await;
        self.events.publish(SessionEvent::SignedIn(session.user.clone()));

        self.refresh_profile(&session.user).await
    }

    async fn run_signup(&self, email: &str, password: &str) -> Result<()> {
        let email = validate_signup(email, password)?;

        let session = self
            .gateway
            .sign_up(&email, password)
            .await
            .map_err(|e| {
                if is_unconfirmed_email(&e) {
                    AppError::Authentication(CONFIRM_EMAIL.into())
                } else if is_invalid_email(&e) {
                    AppError::Validation(INVALID_EMAIL.into())
                } else if is_duplicate_account(&e) {
                    AppError::Authentication(ACCOUNT_EXISTS.into())
                } else {
                    e
                }
            })?;

        let user = session.user;
        tracing::info!("Signed up as {}", user.id);
        self.apply_user(user.clone()).await;
        self.events.publish(SessionEvent::SignedIn(user.clone()));

        let profile = self.await_profile(&user).await?;
        let mut state = self.state.write().await;
        if state.user.as_ref() != Some(&user) {
            return Ok(());
        }
        match profile {
            Some(profile) => {
                state.profile = Some(profile);
                state.profile_degraded = false;
            }
            None => {
                tracing::warn!("Profile for {} is still missing, continuing without it", user.id);
                state.profile = None;
                state.profile_degraded = true;
            }
        }
        drop(state);

        self.persist().await;
        Ok(())
    }

    /// Wait for the backend's signup trigger to create the profile. When it
    /// never shows up, create it here and check once more.
    async fn await_profile(&self, user: &AuthUser) -> Result<Option<Profile>> {
        let gateway = self.gateway.clone();
        let user_id = user.id.clone();

        let found = poll_until_some(self.polling, "Profile", || {
            let gateway = gateway.clone();
            let user_id = user_id.clone();
            async move { tolerate_no_rows(gateway.fetch_profile(&user_id).await) }
        })
        .await?;
        if found.is_some() {
            return Ok(found);
        }

        tracing::warn!("Profile for {} was not created by the backend, creating it", user.id);
        let name = user.email.split('@').next().unwrap_or(&user.email).to_string();
        let new_profile = NewProfile {
            id: user.id.clone(),
            email: user.email.clone(),
            name,
        };
        if let Err(e) = self.gateway.insert_profile(&new_profile).await {
            tracing::warn!("Client-side profile creation failed: {}", e);
        }

        tolerate_no_rows(self.gateway.fetch_profile(&user.id).await)
    }

    async fn run_update_password(&self, current_password: &str, new_password: &str) -> Result<()> {
        let user = self.current_user().await.ok_or(AppError::NotAuthenticated)?;
        validate_new_password(new_password)?;

        self.gateway
            .sign_in(&user.email, current_password)
            .await
            .map_err(|e| match classify(&e) {
                ErrorClass::Credentials => AppError::Authentication(WRONG_CURRENT_PASSWORD.into()),
                _ => e,
            })?;

        self.gateway.update_password(new_password).await?;
        tracing::info!("Password updated for {}", user.id);
        Ok(())
    }

    async fn run_update_profile(&self, patch: ProfilePatch) -> Result<()> {
        let user = self.current_user().await.ok_or(AppError::NotAuthenticated)?;

        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(AppError::Validation("Name is required".into()));
            }
        }

        self.gateway
            .update_profile(&user.id, &patch, Utc::now())
            .await?;
        tracing::info!("Profile updated for {}", user.id);

        self.refresh_profile(&user).await
    }

    async fn refresh_profile(&self, user: &AuthUser) -> Result<()> {
        let profile = tolerate_no_rows(self.gateway.fetch_profile(&user.id).await)?;

        {
            let mut state = self.state.write().await;
            // Signed out or switched identity while the request was in flight
            if state.user.as_ref() != Some(user) {
                return Ok(());
            }
            if profile.is_some() {
                state.profile_degraded = false;
            }
            state.profile = profile;
        }

        self.persist().await;
        Ok(())
    }

    /// Adopt `user` as the current identity. Returns true when the profile
    /// needs loading.
    async fn apply_user(&self, user: AuthUser) -> bool {
        let needs_profile = {
            let mut state = self.state.write().await;
            if state.user.as_ref() != Some(&user) {
                state.user = Some(user);
                state.profile = None;
                state.profile_degraded = false;
            }
            state.profile.is_none() && !state.profile_degraded
        };

        self.persist().await;
        needs_profile
    }

    /// Clear identity and profile. Returns whether anyone was signed in.
    async fn clear_local(&self) -> bool {
        let was_signed_in = {
            let mut state = self.state.write().await;
            let was = state.user.is_some();
            state.user = None;
            state.profile = None;
            state.profile_degraded = false;
            was
        };

        self.persist().await;
        was_signed_in
    }

    async fn persist(&self) {
        let Some(preferences) = &self.preferences else {
            return;
        };

        let snapshot = {
            let state = self.state.read().await;
            AuthSnapshot {
                user: state.user.clone(),
                profile: state.profile.clone(),
            }
        };

        if let Err(e) = preferences.update_auth(snapshot).await {
            tracing::warn!("Failed to persist identity snapshot: {}", e);
        }
    }
}

/// Zero profile rows is "not created yet", not a failure
fn tolerate_no_rows(result: Result<Option<Profile>>) -> Result<Option<Profile>> {
    match result {
        Err(e) if is_no_rows(&e) => Ok(None),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalBackend;
    use std::time::Duration;

    fn fast_polling() -> ProfilePolling {
        ProfilePolling {
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            attempts: 2,
        }
    }

    async fn create_test_service(profile_trigger: bool) -> (IdentityService, Arc<LocalBackend>) {
        let backend = Arc::new(LocalBackend::in_memory(profile_trigger).await.unwrap());
        let service = IdentityService::new(backend.clone(), SessionEvents::new())
            .with_polling(fast_polling());
        (service, backend)
    }

    #[tokio::test]
    async fn test_signup_with_trigger_loads_profile() {
        let (service, _backend) = create_test_service(true).await;

        service.signup("Ada@Example.com", "secret1").await;

        let state = service.state().await;
        assert!(state.error.is_none(), "{:?}", state.error);
        assert_eq!(state.user.as_ref().unwrap().email, "ada@example.com");
        assert_eq!(state.profile.as_ref().unwrap().name, "ada");
        assert!(!state.is_loading);
        assert!(!state.profile_degraded);
    }

    #[tokio::test]
    async fn test_signup_without_trigger_creates_profile() {
        let (service, backend) = create_test_service(false).await;

        service.signup("grace@example.com", "secret1").await;

        let state = service.state().await;
        let user = state.user.unwrap();
        assert_eq!(state.profile.as_ref().unwrap().name, "grace");
        assert!(!state.profile_degraded);

        let stored = backend.repository().get_profile(&user.id).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_signup_message() {
        let (service, _backend) = create_test_service(true).await;
        service.signup("ada@example.com", "secret1").await;
        service.logout().await;

        service.signup("ada@example.com", "secret1").await;

        let state = service.state().await;
        assert_eq!(state.error.as_deref(), Some(ACCOUNT_EXISTS));
        assert!(state.user.is_none());
    }

    #[tokio::test]
    async fn test_login_wrong_password_message() {
        let (service, _backend) = create_test_service(true).await;
        service.signup("ada@example.com", "secret1").await;
        service.logout().await;

        service.login("ada@example.com", "wrong-password").await;

        let state = service.state().await;
        assert_eq!(state.error.as_deref(), Some(INVALID_CREDENTIALS));
        assert!(state.user.is_none());
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_login_validation_message() {
        let (service, _backend) = create_test_service(true).await;

        service.login("", "secret1").await;
        assert_eq!(service.state().await.error.as_deref(), Some("Email is required"));

        service.login("not-an-email", "secret1").await;
        assert_eq!(service.state().await.error.as_deref(), Some(INVALID_EMAIL));

        service.clear_error().await;
        assert!(service.state().await.error.is_none());
    }

    #[tokio::test]
    async fn test_login_loads_profile() {
        let (service, _backend) = create_test_service(true).await;
        service.signup("ada@example.com", "secret1").await;
        service.logout().await;

        service.login("  ADA@example.com ", "secret1").await;

        let state = service.state().await;
        assert!(state.error.is_none());
        assert_eq!(state.profile.unwrap().email, "ada@example.com");
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (service, _backend) = create_test_service(true).await;
        service.signup("ada@example.com", "secret1").await;

        service.logout().await;
        service.logout().await;

        let state = service.state().await;
        assert!(state.user.is_none());
        assert!(state.profile.is_none());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_update_password_verifies_current() {
        let (service, _backend) = create_test_service(true).await;
        service.signup("ada@example.com", "secret1").await;

        service.update_password("not-it", "secret2").await;
        assert_eq!(
            service.state().await.error.as_deref(),
            Some(WRONG_CURRENT_PASSWORD)
        );

        service.update_password("secret1", "abc").await;
        assert_eq!(
            service.state().await.error.as_deref(),
            Some("Password must be at least 6 characters")
        );

        service.update_password("secret1", "secret2").await;
        assert!(service.state().await.error.is_none());

        service.logout().await;
        service.login("ada@example.com", "secret2").await;
        assert!(service.state().await.user.is_some());
    }

    #[tokio::test]
    async fn test_update_password_requires_identity() {
        let (service, _backend) = create_test_service(true).await;

        service.update_password("secret1", "secret2").await;

        assert_eq!(service.state().await.error.as_deref(), Some("Not authenticated"));
    }

    #[tokio::test]
    async fn test_update_profile_refreshes_state() {
        let (service, _backend) = create_test_service(true).await;
        service.signup("ada@example.com", "secret1").await;

        service
            .update_profile(ProfilePatch {
                name: Some("Ada Lovelace".to_string()),
                avatar_url: Some(Some("https://example.com/ada.png".to_string())),
            })
            .await;

        let profile = service.state().await.profile.unwrap();
        assert_eq!(profile.name, "Ada Lovelace");
        assert_eq!(profile.avatar_url.as_deref(), Some("https://example.com/ada.png"));
    }

    #[tokio::test]
    async fn test_fetch_profile_without_identity_is_noop() {
        let (service, _backend) = create_test_service(true).await;

        service.fetch_profile().await;

        let state = service.state().await;
        assert!(state.profile.is_none());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_invalidation_logs_out() {
        let (service, _backend) = create_test_service(true).await;
        service.signup("ada@example.com", "secret1").await;

        service.handle_session_event(SessionEvent::Invalidated).await;

        assert!(service.state().await.user.is_none());
    }

    #[tokio::test]
    async fn test_auth_event_sign_out_clears_identity() {
        let (service, _backend) = create_test_service(true).await;
        service.signup("ada@example.com", "secret1").await;

        service.handle_auth_event(AuthEvent::SignedOut).await;

        assert!(service.state().await.user.is_none());
    }
}
