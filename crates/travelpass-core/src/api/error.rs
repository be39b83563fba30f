use thiserror::Error;

use crate::models::MessageResponse;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Client-side field check failed; nothing was sent
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Credential storage error: {0}")]
    Storage(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Phrases servers use when rejecting an already registered email
const DUPLICATE_EMAIL_MARKERS: &[&str] = &["already", "duplicate", "in use", "이미"];

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Server-supplied `message` field if the body has one, otherwise the
    /// truncated raw body.
    pub fn server_message(body: &str) -> String {
        serde_json::from_str::<MessageResponse>(body)
            .ok()
            .and_then(|r| r.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| Self::truncate_body(body))
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::server_message(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(message),
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(message),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }

    /// Read the body of a failed response and classify it
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::from_status(status, &body)
    }

    /// Whether a server message says the email is already registered
    pub fn mentions_duplicate_email(message: &str) -> bool {
        let lower = message.to_lowercase();
        DUPLICATE_EMAIL_MARKERS.iter().any(|m| lower.contains(m))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    /// Text suitable for showing to the user: the server's message when
    /// there is one, otherwise a generic line for the error class.
    pub fn user_message(&self) -> String {
        let or = |message: &str, fallback: &str| {
            if message.trim().is_empty() {
                fallback.to_string()
            } else {
                message.to_string()
            }
        };
        match self {
            ApiError::Validation(m) => or(m, "Please check the entered values."),
            ApiError::InvalidCredentials(m) => or(m, "Invalid email or password."),
            ApiError::DuplicateEmail(m) => or(m, "This email is already registered."),
            ApiError::Unauthorized(m) => or(m, "Your session has ended. Please log in again."),
            ApiError::NetworkError(e) if e.is_timeout() => {
                "Connection timed out. Please try again.".to_string()
            }
            ApiError::NetworkError(_) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            ApiError::Storage(_) => "Could not access secure storage.".to_string(),
            other => other.to_string(),
        }
    }
}
