//! Input validation
//!
//! Checks run before any request leaves the client. Failures are
//! `AppError::Validation` with a message fit for an inline form banner.

use crate::config::MIN_PASSWORD_LENGTH;
use crate::error::{AppError, Result};

/// `local@domain.tld` with no whitespace and exactly one `@`
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }

    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() {
        return false;
    }

    // Domain needs a dot with something on both sides
    match domain.rfind('.') {
        Some(dot) => dot > 0 && dot + 1 < domain.len(),
        None => false,
    }
}

/// Validate sign-in input and return the normalized email
pub fn validate_credentials(email: &str, password: &str) -> Result<String> {
    let email = email.trim();

    if email.is_empty() {
        return Err(AppError::Validation("Email is required".to_string()));
    }
    if password.is_empty() {
        return Err(AppError::Validation("Password is required".to_string()));
    }
    if !is_valid_email(email) {
        return Err(AppError::Validation(
            "Please enter a valid email address".to_string(),
        ));
    }

    Ok(email.to_lowercase())
}

/// Sign-in rules plus the minimum password length
pub fn validate_signup(email: &str, password: &str) -> Result<String> {
    let email = validate_credentials(email, password)?;
    validate_new_password(password)?;
    Ok(email)
}

pub fn validate_new_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Password-change form check: confirmation must match and meet the length rule
pub fn validate_password_change(new_password: &str, confirmation: &str) -> Result<()> {
    if new_password != confirmation {
        return Err(AppError::Validation("New passwords do not match".to_string()));
    }
    validate_new_password(new_password)
}

/// Clamp a progress value into [0, 1]. Non-finite values are rejected.
pub fn clamp_progress(progress: f64) -> Result<f64> {
    if !progress.is_finite() {
        return Err(AppError::Validation(
            "Progress must be a number between 0 and 1".to_string(),
        ));
    }
    Ok(progress.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_shapes() {
        assert!(is_valid_email("ada@example.com"));
        assert!(is_valid_email("a.b+c@mail.example.co"));

        for bad in [
            "not-an-email",
            "@example.com",
            "ada@",
            "ada@example",
            "ada@.com",
            "ada@example.",
            "ada@@example.com",
            "ada lovelace@example.com",
        ] {
            assert!(!is_valid_email(bad), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_credentials_order_of_checks() {
        let err = validate_credentials("   ", "").unwrap_err();
        assert_eq!(err.to_string(), "Email is required");

        let err = validate_credentials("ada@example.com", "").unwrap_err();
        assert_eq!(err.to_string(), "Password is required");

        let err = validate_credentials("not-an-email", "secret").unwrap_err();
        assert_eq!(err.to_string(), "Please enter a valid email address");
    }

    #[test]
    fn test_credentials_normalize_email() {
        let email = validate_credentials("  Ada@Example.COM ", "secret").unwrap();
        assert_eq!(email, "ada@example.com");
    }

    #[test]
    fn test_signup_requires_six_characters() {
        let err = validate_signup("ada@example.com", "12345").unwrap_err();
        assert_eq!(err.to_string(), "Password must be at least 6 characters");

        assert!(validate_signup("ada@example.com", "123456").is_ok());
    }

    #[test]
    fn test_password_change_form() {
        let err = validate_password_change("secret12", "secret13").unwrap_err();
        assert_eq!(err.to_string(), "New passwords do not match");

        let err = validate_password_change("abc", "abc").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(validate_password_change("secret12", "secret12").is_ok());
    }

    #[test]
    fn test_clamp_progress() {
        assert_eq!(clamp_progress(1.4).unwrap(), 1.0);
        assert_eq!(clamp_progress(-0.2).unwrap(), 0.0);
        assert_eq!(clamp_progress(0.35).unwrap(), 0.35);
        assert!(clamp_progress(f64::NAN).is_err());
        assert!(clamp_progress(f64::INFINITY).is_err());
    }
}
