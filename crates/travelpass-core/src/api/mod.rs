//! REST API client module for the travel app's auth server.
//!
//! This module provides the `ApiClient` for the `/api/auth` endpoints and
//! the `AuthPipeline` every authenticated request goes through.
//!
//! The API uses JWT bearer tokens; an expired access token is renewed once
//! per request through `/api/auth/refresh`.

pub mod client;
pub mod error;
pub mod pipeline;
pub mod request;

pub use client::ApiClient;
pub use error::ApiError;
pub use pipeline::AuthPipeline;
pub use request::{PendingRequest, RequestDescriptor};
