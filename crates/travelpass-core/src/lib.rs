//! travelpass core - auth API client with a refreshing bearer-token pipeline.
//!
//! A front-end builds one [`ApiClient`] with an injected credential store,
//! checks [`ApiClient::check_session`] at startup, and reacts to the
//! [`SessionEvent`]s the client emits on login, logout and session expiry.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod validation;

pub use api::{ApiClient, ApiError, AuthPipeline, RequestDescriptor};
pub use auth::{CredentialStore, KeyringStore, MemoryStore, Session, SessionEvent};
pub use config::Config;
pub use models::{SignupResponse, TokenPair};
pub use reqwest::Method;
