//! Client-side field checks run before any request is sent.
//!
//! The server validates the same fields and stays the source of truth;
//! these checks only fail fast on input that cannot succeed.

use crate::api::ApiError;

pub const PASSWORD_MIN_LENGTH: usize = 8;
pub const PASSWORD_MAX_LENGTH: usize = 20;
pub const NICKNAME_MIN_LENGTH: usize = 2;
pub const NICKNAME_MAX_LENGTH: usize = 20;

/// Minimal address shape: `local@domain.tld`, no whitespace.
pub fn validate_email(email: &str) -> Result<(), ApiError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ApiError::Validation("Email is required".to_string()));
    }
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ApiError::Validation("Invalid email format".to_string()))
    }
}

/// Login only enforces the minimum length.
pub fn validate_login_password(password: &str) -> Result<(), ApiError> {
    if password.is_empty() {
        return Err(ApiError::Validation("Password is required".to_string()));
    }
    if password.chars().count() < PASSWORD_MIN_LENGTH {
        return Err(ApiError::Validation(format!(
            "Password must be at least {} characters",
            PASSWORD_MIN_LENGTH
        )));
    }
    Ok(())
}

pub fn validate_signup_password(password: &str) -> Result<(), ApiError> {
    validate_login_password(password)?;
    if password.chars().count() > PASSWORD_MAX_LENGTH {
        return Err(ApiError::Validation(format!(
            "Password must be {} to {} characters",
            PASSWORD_MIN_LENGTH, PASSWORD_MAX_LENGTH
        )));
    }
    Ok(())
}

pub fn validate_nickname(nickname: &str) -> Result<(), ApiError> {
    let len = nickname.trim().chars().count();
    if len == 0 {
        return Err(ApiError::Validation("Nickname is required".to_string()));
    }
    if !(NICKNAME_MIN_LENGTH..=NICKNAME_MAX_LENGTH).contains(&len) {
        return Err(ApiError::Validation(format!(
            "Nickname must be {} to {} characters",
            NICKNAME_MIN_LENGTH, NICKNAME_MAX_LENGTH
        )));
    }
    Ok(())
}
