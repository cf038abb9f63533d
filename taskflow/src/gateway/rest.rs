//! Hosted backend gateway
//!
//! Talks to the backend-as-a-service over its REST surface: GoTrue-style
//! auth endpoints under `/auth/v1` and PostgREST table endpoints under
//! `/rest/v1`. Row-level security is enforced server side; this client only
//! attaches the session token.

use super::rows::*;
use super::{AuthEvent, Gateway, AUTH_EVENT_CAPACITY};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};

const PROJECT_SELECT: &str = "*,project_members(role,user:profiles(id,name,avatar_url))";
const TASK_SELECT: &str =
    "*,subtasks(*),task_tags(tag),assignee:profiles!tasks_assignee_id_fkey(id,name,avatar_url)";

/// Refresh the access token this long before it expires
const REFRESH_MARGIN_SECS: i64 = 60;

/// Token grant returned by the auth endpoints
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: WireUser,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    email: Option<String>,
}

impl From<WireUser> for AuthUser {
    fn from(user: WireUser) -> Self {
        AuthUser {
            id: user.id,
            email: user.email.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// Error body shapes used by the auth and table endpoints
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
    error_code: Option<String>,
    code: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct StoredSession {
    session: AuthSession,
    refresh_token: Option<String>,
}

/// Gateway for the hosted backend
pub struct RestGateway {
    http: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<StoredSession>>,
    /// Serializes refresh-token exchanges; a refresh token is single use
    refresh_lock: Mutex<()>,
    events: broadcast::Sender<AuthEvent>,
}

impl RestGateway {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("taskflow/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            events,
        })
    }

    async fn access_token(&self) -> String {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.session.access_token.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.anon_key.clone())
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let token = self.access_token().await;
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    async fn table(&self, method: Method, table: &str) -> RequestBuilder {
        self.request(method, &format!("/rest/v1/{}", table)).await
    }

    async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_body(status, &body));
        }
        Ok(response.json::<T>().await?)
    }

    async fn send_empty(builder: RequestBuilder) -> Result<()> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_body(status, &body));
        }
        Ok(())
    }

    /// Insert rows and return the representation of the first one
    async fn insert_returning<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<T> {
        let builder = self
            .table(Method::POST, table)
            .await
            .header("Prefer", "return=representation")
            .json(body);

        let mut rows: Vec<T> = Self::send_json(builder).await?;
        if rows.is_empty() {
            return Err(AppError::backend(
                format!("Insert into {} returned no rows", table),
                Some("PGRST116"),
            ));
        }
        Ok(rows.swap_remove(0))
    }

    async fn insert_many<B: Serialize + ?Sized>(&self, table: &str, body: &B) -> Result<()> {
        let builder = self
            .table(Method::POST, table)
            .await
            .header("Prefer", "return=minimal")
            .json(body);
        Self::send_empty(builder).await
    }

    async fn patch_where<B: Serialize>(&self, table: &str, column: &str, value: &str, body: &B) -> Result<()> {
        let builder = self
            .table(Method::PATCH, table)
            .await
            .query(&[(column, eq(value))])
            .json(body);
        Self::send_empty(builder).await
    }

    async fn delete_where(&self, table: &str, column: &str, value: &str) -> Result<()> {
        let builder = self
            .table(Method::DELETE, table)
            .await
            .query(&[(column, eq(value))]);
        Self::send_empty(builder).await
    }

    async fn store_grant(&self, grant: TokenResponse) -> AuthSession {
        let expires_at = grant
            .expires_at
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .or_else(|| grant.expires_in.map(|secs| Utc::now() + ChronoDuration::seconds(secs)));

        let session = AuthSession {
            user: grant.user.into(),
            access_token: grant.access_token,
            expires_at,
        };

        *self.session.write().await = Some(StoredSession {
            session: session.clone(),
            refresh_token: grant.refresh_token,
        });

        session
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Exchange the refresh token when the access token is about to expire
    async fn refresh_if_needed(&self) -> Result<()> {
        // Checked under the lock so a caller that waited sees the new grant
        let _guard = self.refresh_lock.lock().await;

        let (expires_at, refresh_token) = match self.session.read().await.as_ref() {
            Some(stored) => (stored.session.expires_at, stored.refresh_token.clone()),
            None => return Ok(()),
        };

        let due = expires_at
            .map(|at| at - ChronoDuration::seconds(REFRESH_MARGIN_SECS) <= Utc::now())
            .unwrap_or(false);
        let Some(refresh_token) = refresh_token.filter(|_| due) else {
            return Ok(());
        };

        tracing::debug!("Refreshing access token");

        let builder = self
            .http
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }));

        match Self::send_json::<TokenResponse>(builder).await {
            Ok(grant) => {
                let session = self.store_grant(grant).await;
                self.emit(AuthEvent::TokenRefreshed(session.user));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                *self.session.write().await = None;
                self.emit(AuthEvent::SignedOut);
                Err(e)
            }
        }
    }
}

/// PostgREST equality filter
fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

/// Merge an `updated_at` stamp into a serialized patch
fn with_updated_at<P: Serialize>(patch: &P, updated_at: DateTime<Utc>) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(patch)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "updated_at".to_string(),
            serde_json::Value::String(updated_at.to_rfc3339()),
        );
    }
    Ok(value)
}

/// Map an error response into `AppError::Backend`, keeping message and code
fn error_from_body(status: StatusCode, body: &str) -> AppError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

    let message = parsed
        .message
        .or(parsed.msg)
        .or(parsed.error_description)
        .or_else(|| parsed.error.clone())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });

    let code = parsed
        .error_code
        .or_else(|| match parsed.code {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(serde_json::Value::Number(n)) if status != StatusCode::UNAUTHORIZED => {
                Some(n.to_string())
            }
            _ => None,
        })
        .or(parsed.error)
        .or_else(|| {
            (status == StatusCode::UNAUTHORIZED).then(|| status.as_u16().to_string())
        });

    AppError::Backend { message, code }
}

#[async_trait]
impl Gateway for RestGateway {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let builder = self
            .http
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&Credentials { email, password });

        let grant: TokenResponse = Self::send_json(builder).await?;
        let session = self.store_grant(grant).await;

        tracing::debug!("Signed in as {}", session.user.id);
        self.emit(AuthEvent::SignedIn(session.user.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession> {
        let builder = self
            .http
            .post(format!("{}/auth/v1/signup", self.base_url))
            .header("apikey", &self.anon_key)
            .json(&Credentials { email, password });

        let body: serde_json::Value = Self::send_json(builder).await?;

        // Autoconfirm projects answer with a token grant; otherwise only the user comes back
        if body.get("access_token").is_some() {
            let grant: TokenResponse = serde_json::from_value(body)?;
            let session = self.store_grant(grant).await;
            self.emit(AuthEvent::SignedIn(session.user.clone()));
            return Ok(session);
        }

        let user: WireUser = serde_json::from_value(body)?;
        tracing::warn!("Signup for {} returned no session; email confirmation required", user.id);
        Err(AppError::backend(
            "Email not confirmed",
            Some("email_not_confirmed"),
        ))
    }

    async fn sign_out(&self) -> Result<()> {
        let had_session = self.session.read().await.is_some();
        let result = if had_session {
            let builder = self.request(Method::POST, "/auth/v1/logout").await;
            Self::send_empty(builder).await
        } else {
            Ok(())
        };

        *self.session.write().await = None;
        self.emit(AuthEvent::SignedOut);
        result
    }

    async fn update_password(&self, new_password: &str) -> Result<()> {
        if self.session.read().await.is_none() {
            return Err(AppError::backend("Auth session missing!", Some("session_not_found")));
        }

        let builder = self
            .request(Method::PUT, "/auth/v1/user")
            .await
            .json(&serde_json::json!({ "password": new_password }));

        let user: WireUser = Self::send_json(builder).await?;
        self.emit(AuthEvent::UserUpdated(user.into()));
        Ok(())
    }

    async fn current_user(&self) -> Result<Option<AuthUser>> {
        if self.session.read().await.is_none() {
            return Ok(None);
        }

        self.refresh_if_needed().await?;

        let builder = self.request(Method::GET, "/auth/v1/user").await;
        let user: WireUser = Self::send_json(builder).await?;
        Ok(Some(user.into()))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        let builder = self
            .table(Method::GET, "profiles")
            .await
            .query(&[("select", "*".to_string()), ("id", eq(user_id))]);

        let rows: Vec<ProfileRow> = Self::send_json(builder).await?;
        if rows.len() > 1 {
            tracing::warn!("Multiple profile rows for {}; using the first", user_id);
        }
        Ok(rows.into_iter().next())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<ProfileRow> {
        self.insert_returning("profiles", std::slice::from_ref(profile)).await
    }

    async fn update_profile(
        &self,
        user_id: &str,
        patch: &ProfilePatch,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let body = with_updated_at(patch, updated_at)?;
        self.patch_where("profiles", "id", user_id, &body).await
    }

    async fn owned_project_ids(&self, owner_id: &str, limit: usize) -> Result<Vec<String>> {
        let builder = self.table(Method::GET, "projects").await.query(&[
            ("select", "id".to_string()),
            ("owner_id", eq(owner_id)),
            ("limit", limit.to_string()),
        ]);

        let rows: Vec<IdOnly> = Self::send_json(builder).await?;
        Ok(rows.into_iter().map(|r| r.id).collect())
    }

    async fn list_projects_with_members(&self, owner_id: &str) -> Result<Vec<ProjectJoinRow>> {
        let builder = self.table(Method::GET, "projects").await.query(&[
            ("select", PROJECT_SELECT.to_string()),
            ("owner_id", eq(owner_id)),
            ("order", "created_at.desc".to_string()),
        ]);

        Self::send_json(builder).await
    }

    async fn insert_project(&self, project: &NewProject) -> Result<ProjectRow> {
        self.insert_returning("projects", std::slice::from_ref(project)).await
    }

    async fn update_project(
        &self,
        id: &str,
        patch: &ProjectPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let body = with_updated_at(patch, updated_at)?;
        self.patch_where("projects", "id", id, &body).await
    }

    async fn delete_project(&self, id: &str) -> Result<()> {
        self.delete_where("projects", "id", id).await
    }

    async fn insert_member(&self, member: &NewProjectMember) -> Result<()> {
        self.insert_many("project_members", std::slice::from_ref(member)).await
    }

    async fn list_tasks_with_details(&self) -> Result<Vec<TaskJoinRow>> {
        let builder = self.table(Method::GET, "tasks").await.query(&[
            ("select", TASK_SELECT),
            ("order", "created_at.desc"),
        ]);

        Self::send_json(builder).await
    }

    async fn insert_task(&self, task: &NewTask) -> Result<TaskRow> {
        self.insert_returning("tasks", std::slice::from_ref(task)).await
    }

    async fn update_task(
        &self,
        id: &str,
        patch: &TaskPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let body = with_updated_at(patch, updated_at)?;
        self.patch_where("tasks", "id", id, &body).await
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        self.delete_where("tasks", "id", id).await
    }

    async fn delete_subtasks(&self, task_id: &str) -> Result<()> {
        self.delete_where("subtasks", "task_id", task_id).await
    }

    async fn insert_subtasks(&self, subtasks: &[NewSubtask]) -> Result<()> {
        if subtasks.is_empty() {
            return Ok(());
        }
        self.insert_many("subtasks", subtasks).await
    }

    async fn delete_tags(&self, task_id: &str) -> Result<()> {
        self.delete_where("task_tags", "task_id", task_id).await
    }

    async fn insert_tags(&self, tags: &[NewTaskTag]) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        self.insert_many("task_tags", tags).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{classify, is_unconfirmed_email, ErrorClass};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const GRANT: &str = r#"{"access_token":"fresh","refresh_token":"r2","expires_in":3600,"user":{"id":"u1","email":"ada@example.com"}}"#;

    fn header_end(data: &[u8]) -> Option<usize> {
        data.windows(4).position(|w| w == b"\r\n\r\n")
    }

    /// Answer every request with `body` after a short delay. Returns the base
    /// URL and a request counter.
    async fn serve_json(body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    loop {
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        request.extend_from_slice(&buf[..n]);
                        if let Some(end) = header_end(&request) {
                            let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
                            let length = head
                                .lines()
                                .find_map(|l| l.strip_prefix("content-length:"))
                                .and_then(|v| v.trim().parse::<usize>().ok())
                                .unwrap_or(0);
                            if request.len() >= end + 4 + length {
                                break;
                            }
                        }
                    }

                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;

                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{}", addr), hits)
    }

    #[test]
    fn test_auth_error_body_keeps_error_code() {
        let body = r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#;
        let err = error_from_body(StatusCode::BAD_REQUEST, body);

        assert_eq!(err.to_string(), "Invalid login credentials");
        assert_eq!(err.code(), Some("invalid_credentials"));
        assert_eq!(classify(&err), ErrorClass::Credentials);
    }

    #[test]
    fn test_legacy_auth_error_body() {
        let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        let err = error_from_body(StatusCode::BAD_REQUEST, body);

        assert_eq!(err.to_string(), "Invalid login credentials");
        assert_eq!(err.code(), Some("invalid_grant"));
    }

    #[test]
    fn test_expired_jwt_is_session_failure() {
        let body = r#"{"code":"PGRST301","details":null,"hint":null,"message":"JWT expired"}"#;
        let err = error_from_body(StatusCode::UNAUTHORIZED, body);

        assert_eq!(err.code(), Some("PGRST301"));
        assert_eq!(classify(&err), ErrorClass::Session);
    }

    #[test]
    fn test_unparseable_401_gets_status_code() {
        let err = error_from_body(StatusCode::UNAUTHORIZED, "<html>nope</html>");

        assert_eq!(err.to_string(), "Unauthorized");
        assert_eq!(err.code(), Some("401"));
        assert_eq!(classify(&err), ErrorClass::Session);
    }

    #[test]
    fn test_query_error_is_not_session() {
        let body = r#"{"code":"42703","message":"column tasks.bogus does not exist"}"#;
        let err = error_from_body(StatusCode::BAD_REQUEST, body);

        assert_eq!(classify(&err), ErrorClass::Other);
    }

    #[test]
    fn test_with_updated_at_merges_stamp() {
        let stamp = Utc::now();
        let patch = ProjectPatch {
            title: Some("Renamed".to_string()),
            ..Default::default()
        };

        let value = with_updated_at(&patch, stamp).unwrap();
        assert_eq!(value["title"], "Renamed");
        assert_eq!(value["updated_at"], stamp.to_rfc3339());
        assert!(value.get("color").is_none());
    }

    #[tokio::test]
    async fn test_current_user_without_session_skips_request() {
        let gateway =
            RestGateway::new("http://127.0.0.1:9", "anon", Duration::from_secs(1)).unwrap();

        assert_eq!(gateway.current_user().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sign_out_without_session_emits_event() {
        let gateway =
            RestGateway::new("http://127.0.0.1:9", "anon", Duration::from_secs(1)).unwrap();
        let mut events = gateway.subscribe();

        gateway.sign_out().await.unwrap();

        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);
    }

    #[tokio::test]
    async fn test_overlapping_refreshes_spend_token_once() {
        let (url, hits) = serve_json(GRANT).await;
        let gateway = RestGateway::new(&url, "anon", Duration::from_secs(5)).unwrap();
        *gateway.session.write().await = Some(StoredSession {
            session: AuthSession {
                user: AuthUser {
                    id: "u1".to_string(),
                    email: "ada@example.com".to_string(),
                },
                access_token: "stale".to_string(),
                expires_at: Some(Utc::now() - ChronoDuration::seconds(5)),
            },
            refresh_token: Some("r1".to_string()),
        });

        let (first, second) =
            tokio::join!(gateway.refresh_if_needed(), gateway.refresh_if_needed());
        first.unwrap();
        second.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.access_token().await, "fresh");
    }

    #[tokio::test]
    async fn test_signup_without_session_needs_confirmation() {
        let (url, hits) = serve_json(r#"{"id":"u2","email":"bob@example.com"}"#).await;
        let gateway = RestGateway::new(&url, "anon", Duration::from_secs(5)).unwrap();

        let err = gateway
            .sign_up("bob@example.com", "secret1")
            .await
            .unwrap_err();

        assert!(is_unconfirmed_email(&err));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.current_user().await.unwrap(), None);
    }
}
