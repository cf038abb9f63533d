//! Error types for the TaskFlow client core
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized to a front end as plain strings.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Bad input detected locally; never reaches the backend
    #[error("{0}")]
    Validation(String),

    /// Backend rejected credentials or a re-verification step failed
    #[error("{0}")]
    Authentication(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    /// Structured error returned by the backend
    #[error("{message}")]
    Backend {
        message: String,
        code: Option<String>,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Generic(String),
}

impl AppError {
    pub fn backend(message: impl Into<String>, code: Option<&str>) -> Self {
        AppError::Backend {
            message: message.into(),
            code: code.map(str::to_string),
        }
    }

    /// Machine code attached by the backend, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            AppError::Backend { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// How a failure should be treated by the state containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The session is missing, expired or rejected. Degrades to demo data
    /// and invalidates the local identity.
    Session,
    /// Sign-in credentials were rejected
    Credentials,
    /// The request never got a response (connect failure, timeout)
    Transport,
    Other,
}

/// Backend codes that mean the session itself is no longer usable
const SESSION_CODES: &[&str] = &[
    "PGRST301",
    "PGRST302",
    "401",
    "bad_jwt",
    "no_authorization",
    "session_not_found",
    "session_expired",
    "refresh_token_not_found",
    "user_not_found",
];

const SESSION_MESSAGES: &[&str] = &[
    "jwt expired",
    "invalid jwt",
    "invalid session",
    "auth session missing",
    "not authenticated",
    "authentication failed",
];

const CREDENTIAL_CODES: &[&str] = &["invalid_credentials", "invalid_grant"];

/// Single point where backend error shapes are sniffed.
///
/// Structured codes are checked first; message matching is the fallback for
/// backends that only return text.
pub fn classify(err: &AppError) -> ErrorClass {
    match err {
        AppError::NotAuthenticated => ErrorClass::Session,
        AppError::Authentication(_) => ErrorClass::Credentials,
        AppError::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
            ErrorClass::Transport
        }
        AppError::Http(e) => match e.status().map(|s| s.as_u16()) {
            Some(401) => ErrorClass::Session,
            _ => ErrorClass::Transport,
        },
        AppError::Backend { message, code } => {
            if let Some(code) = code.as_deref() {
                if SESSION_CODES.contains(&code) {
                    return ErrorClass::Session;
                }
                if CREDENTIAL_CODES.contains(&code) {
                    return ErrorClass::Credentials;
                }
            }
            let lower = message.to_lowercase();
            if lower.contains("invalid login credentials") {
                ErrorClass::Credentials
            } else if SESSION_MESSAGES.iter().any(|m| lower.contains(m)) {
                ErrorClass::Session
            } else {
                ErrorClass::Other
            }
        }
        _ => ErrorClass::Other,
    }
}

/// PostgREST "no rows" on a single-object request. List queries treat it as empty.
pub fn is_no_rows(err: &AppError) -> bool {
    err.code() == Some("PGRST116")
}

/// Signup rejected because the email is already registered
pub fn is_duplicate_account(err: &AppError) -> bool {
    matches!(err.code(), Some("user_already_exists") | Some("email_exists"))
        || (matches!(err, AppError::Backend { .. })
            && err.to_string().contains("User already registered"))
}

/// Signup rejected because the backend considers the email malformed
pub fn is_invalid_email(err: &AppError) -> bool {
    err.code() == Some("email_address_invalid")
        || (matches!(err, AppError::Backend { .. })
            && err.to_string().contains("email_address_invalid"))
}

/// The account exists but its email address has not been confirmed yet
pub fn is_unconfirmed_email(err: &AppError) -> bool {
    err.code() == Some("email_not_confirmed")
}
