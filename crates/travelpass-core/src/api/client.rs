//! API client for the `/api/auth` endpoints.
//!
//! `ApiClient` owns the authenticated pipeline and layers the account
//! operations on top of it: signup, login (password or Google ID token) and
//! logout, plus typed JSON helpers for the rest of the API.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::pipeline::AuthPipeline;
use super::request::RequestDescriptor;
use super::ApiError;
use crate::auth::{CredentialStore, Session, SessionEvent};
use crate::config::Config;
use crate::models::{GoogleLoginRequest, LoginRequest, SignupRequest, SignupResponse, TokenPair};
use crate::validation;

// ============================================================================
// Constants
// ============================================================================

const SIGNUP_PATH: &str = "/api/auth/signup";
const LOGIN_PATH: &str = "/api/auth/login";
const GOOGLE_LOGIN_PATH: &str = "/api/auth/google";
const LOGOUT_PATH: &str = "/api/auth/logout";

/// HTTP request timeout in seconds when no config is given.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Clone is cheap - the pipeline only holds shared handles.
#[derive(Clone)]
pub struct ApiClient {
    pipeline: AuthPipeline,
}

impl ApiClient {
    /// Create a client for `base_url` storing tokens in `store`
    pub fn new(base_url: &str, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, store, DEFAULT_REQUEST_TIMEOUT_SECS)
    }

    pub fn from_config(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        Self::with_timeout(&config.base_url, store, config.request_timeout_secs)
    }

    fn with_timeout(
        base_url: &str,
        store: Arc<dyn CredentialStore>,
        timeout_secs: u64,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self::with_http(http, base_url, store))
    }

    /// Create a client on an existing reqwest client, sharing its connection pool
    pub fn with_http(http: Client, base_url: &str, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            pipeline: AuthPipeline::new(http, base_url, Session::new(store)),
        }
    }

    pub fn session(&self) -> &Session {
        self.pipeline.session()
    }

    /// Whether a session is believed to exist (see `Session::check_session`)
    pub async fn check_session(&self) -> bool {
        self.session().check_session().await
    }

    // ===== Account Operations =====

    /// Log in with email and password. On success both tokens are stored
    /// and `SessionEvent::LoginSucceeded` is emitted.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, ApiError> {
        validation::validate_email(email)?;
        validation::validate_login_password(password)?;

        let request = RequestDescriptor::post(LOGIN_PATH).with_json(&LoginRequest {
            email: email.trim(),
            password,
        })?;
        let pair = self.request_tokens(&request).await?;
        self.complete_login(&pair).await?;
        info!("Login successful");
        Ok(pair)
    }

    /// Log in with a Google ID token obtained by the front-end
    pub async fn login_with_google(&self, id_token: &str) -> Result<TokenPair, ApiError> {
        if id_token.trim().is_empty() {
            return Err(ApiError::Validation("Google ID token is required".to_string()));
        }

        let request = RequestDescriptor::post(GOOGLE_LOGIN_PATH)
            .with_json(&GoogleLoginRequest { id_token: id_token.trim() })?;
        let pair = self.request_tokens(&request).await?;
        self.complete_login(&pair).await?;
        info!("Google login successful");
        Ok(pair)
    }

    /// Register a new account. Does not log in.
    ///
    /// A 409 is taken as "email already registered". Servers that reject a
    /// duplicate with another status are recognized by their message (see
    /// `ApiError::mentions_duplicate_email`).
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        nickname: &str,
    ) -> Result<SignupResponse, ApiError> {
        validation::validate_email(email)?;
        validation::validate_signup_password(password)?;
        validation::validate_nickname(nickname)?;

        let request = RequestDescriptor::post(SIGNUP_PATH).with_json(&SignupRequest {
            email: email.trim(),
            password,
            nickname: nickname.trim(),
        })?;
        let response = self.pipeline.send_unauthenticated(&request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = ApiError::server_message(&body);
            return Err(match status {
                StatusCode::CONFLICT => ApiError::DuplicateEmail(message),
                _ if ApiError::mentions_duplicate_email(&message) => {
                    ApiError::DuplicateEmail(message)
                }
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                    ApiError::Validation(message)
                }
                _ => ApiError::from_status(status, &body),
            });
        }

        let signup: SignupResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse signup response: {}", e)))?;
        info!(user_id = signup.user_id, "Signup successful");
        Ok(signup)
    }

    /// Log out. The server call is best-effort; local tokens are cleared
    /// whatever it returns. Only a failure to clear local storage is an error.
    pub async fn logout(&self) -> Result<(), ApiError> {
        match self.pipeline.send(RequestDescriptor::post(LOGOUT_PATH)).await {
            Ok(_) => debug!("Server logout acknowledged"),
            Err(e) => warn!(error = %e, "Server logout failed, clearing local session anyway"),
        }

        self.session()
            .clear()
            .await
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        self.session().emit(SessionEvent::LoggedOut);
        info!("Logged out");
        Ok(())
    }

    /// POST a login-style request and parse the issued token pair
    async fn request_tokens(&self, request: &RequestDescriptor) -> Result<TokenPair, ApiError> {
        let response = self.pipeline.send_unauthenticated(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ApiError::InvalidCredentials(ApiError::server_message(&body))
                }
                _ => ApiError::from_status(status, &body),
            });
        }

        let pair: TokenPair = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse token response: {}", e)))?;
        if pair.access_token.is_empty() {
            return Err(ApiError::InvalidResponse("Token response has no access token".to_string()));
        }
        Ok(pair)
    }

    async fn complete_login(&self, pair: &TokenPair) -> Result<(), ApiError> {
        if let Err(e) = self.session().save_tokens(pair).await {
            warn!(error = %e, "Failed to store tokens after login");
            // Don't leave half a pair behind
            if let Err(e) = self.session().clear().await {
                warn!(error = %e, "Failed to clear partially stored tokens");
            }
            return Err(ApiError::Storage(e.to_string()));
        }

        self.session().emit(SessionEvent::LoginSucceeded {
            expires_at: pair.expires_at(Utc::now()),
        });
        Ok(())
    }

    // ===== Authenticated Requests =====

    /// Send any request through the authenticated pipeline
    pub async fn send(&self, request: RequestDescriptor) -> Result<Response, ApiError> {
        self.pipeline.send(request).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(RequestDescriptor::get(path)).await?;
        Self::parse_json(response, path).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.send(RequestDescriptor::post(path).with_json(body)?).await?;
        Self::parse_json(response, path).await
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e))
        })
    }
}
