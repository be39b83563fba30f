//! Authenticated request pipeline.
//!
//! Every request goes out with the stored access token as a bearer header.
//! A 401 triggers exactly one refresh-and-replay cycle per request; if the
//! refresh fails the stored tokens are cleared, `SessionEvent::SessionExpired`
//! is emitted, and the caller gets the original 401.
//!
//! Requests that hit a 401 at the same time each run their own refresh;
//! there is no single-flight coalescing.

use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use super::request::{PendingRequest, RequestDescriptor};
use super::ApiError;
use crate::auth::{Session, SessionEvent};
use crate::models::{RefreshTokenRequest, TokenPair};

pub(crate) const REFRESH_PATH: &str = "/api/auth/refresh";

enum RefreshOutcome {
    Refreshed(String),
    NoRefreshToken,
    Failed,
}

/// Clone is cheap - reqwest::Client and Session are both shared handles.
#[derive(Clone)]
pub struct AuthPipeline {
    http: Client,
    base_url: String,
    session: Session,
}

impl AuthPipeline {
    pub fn new(http: Client, base_url: &str, session: Session) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Send a request with bearer authorization, refreshing once on 401.
    ///
    /// Returns the successful response unchanged. Any non-2xx status becomes
    /// an `ApiError`; after a failed refresh it is the error of the original
    /// request, never the refresh error.
    pub async fn send(&self, request: RequestDescriptor) -> Result<Response, ApiError> {
        let mut pending = PendingRequest::new(request);
        let mut token = self.session.access_token().await;

        loop {
            let response = self.dispatch(&pending.request, token.as_deref()).await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let error = ApiError::from_response(response).await;
            if status != StatusCode::UNAUTHORIZED || pending.retried {
                debug!(
                    path = %pending.request.path,
                    status = status.as_u16(),
                    retried = pending.retried,
                    "Request failed"
                );
                return Err(error);
            }

            pending = pending.mark_retried();
            debug!(path = %pending.request.path, "Got 401, attempting token refresh");

            match self.refresh().await {
                RefreshOutcome::Refreshed(access_token) => token = Some(access_token),
                RefreshOutcome::NoRefreshToken | RefreshOutcome::Failed => return Err(error),
            }
        }
    }

    /// Send without authorization and without the refresh rule. The response
    /// is returned whatever its status.
    pub(crate) async fn send_unauthenticated(
        &self,
        request: &RequestDescriptor,
    ) -> Result<Response, ApiError> {
        self.dispatch(request, None).await
    }

    async fn dispatch(
        &self,
        request: &RequestDescriptor,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let mut builder = self.http.request(request.method.clone(), self.url(&request.path));
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        debug!(method = %request.method, path = %request.path, authorized = token.is_some(), "Dispatching request");
        Ok(builder.send().await?)
    }

    async fn refresh(&self) -> RefreshOutcome {
        let Some(refresh_token) = self.session.refresh_token().await else {
            debug!("No refresh token stored, not refreshing");
            return RefreshOutcome::NoRefreshToken;
        };

        let pair = match self.request_refresh(&refresh_token).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.end_session().await;
                return RefreshOutcome::Failed;
            }
        };

        // Write-after-success: stored before the replay goes out
        if let Err(e) = self.session.save_refreshed(&pair, &refresh_token).await {
            warn!(error = %e, "Failed to store refreshed token, ending session");
            self.end_session().await;
            return RefreshOutcome::Failed;
        }

        debug!("Token refreshed, replaying request");
        RefreshOutcome::Refreshed(pair.access_token)
    }

    /// `POST /api/auth/refresh` on the bare client.
    pub(crate) async fn request_refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let response = self
            .http
            .post(self.url(REFRESH_PATH))
            .json(&RefreshTokenRequest { refresh_token })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }

        let pair: TokenPair = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse refresh response: {}", e)))?;
        if pair.access_token.is_empty() {
            return Err(ApiError::InvalidResponse("Refresh response has no access token".to_string()));
        }
        Ok(pair)
    }

    async fn end_session(&self) {
        if let Err(e) = self.session.clear().await {
            warn!(error = %e, "Failed to clear stored tokens");
        }
        self.session.emit(SessionEvent::SessionExpired);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;
    use mockito::{Matcher, Server};
    use serde_json::json;

    use super::*;
    use crate::auth::session::tests::BrokenStore;
    use crate::auth::{CredentialStore, MemoryStore, TokenKey};

    fn pipeline(server: &Server, store: Arc<dyn CredentialStore>) -> AuthPipeline {
        AuthPipeline::new(Client::new(), &server.url(), Session::new(store))
    }

    fn token_body(access: &str, refresh: &str) -> String {
        json!({
            "accessToken": access,
            "refreshToken": refresh,
            "tokenType": "Bearer",
            "expiresIn": 1800
        })
        .to_string()
    }

    /// Reads work, writes fail
    struct ReadOnlyStore(MemoryStore);

    #[async_trait]
    impl CredentialStore for ReadOnlyStore {
        async fn get(&self, key: TokenKey) -> Result<Option<String>> {
            self.0.get(key).await
        }

        async fn set(&self, _key: TokenKey, _value: &str) -> Result<()> {
            Err(anyhow::anyhow!("keychain is read-only"))
        }

        async fn delete(&self, key: TokenKey) -> Result<()> {
            self.0.delete(key).await
        }
    }

    #[test]
    fn test_url_joining() {
        let p = AuthPipeline::new(
            Client::new(),
            "http://localhost:8081/",
            Session::new(Arc::new(MemoryStore::new())),
        );
        assert_eq!(p.base_url(), "http://localhost:8081");
        assert_eq!(p.url("/api/auth/login"), "http://localhost:8081/api/auth/login");
        assert_eq!(p.url("api/trips"), "http://localhost:8081/api/trips");
    }

    #[tokio::test]
    async fn test_no_token_sends_no_authorization_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/public")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body("ok")
            .expect(1)
            .create_async()
            .await;

        let p = pipeline(&server, Arc::new(MemoryStore::new()));
        let response = p.send(RequestDescriptor::get("/api/public")).await.unwrap();
        assert_eq!(response.text().await.unwrap(), "ok");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stored_token_is_attached() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/trips")
            .match_header("authorization", "Bearer A1")
            .match_body(Matcher::Json(json!({ "name": "Jeju" })))
            .with_status(201)
            .with_body(r#"{"id":7}"#)
            .expect(1)
            .create_async()
            .await;

        let p = pipeline(&server, Arc::new(MemoryStore::with_tokens(Some("A1"), Some("R1"))));
        let request = RequestDescriptor::post("/api/trips").with_body(json!({ "name": "Jeju" }));
        let response = p.send(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_and_replay_with_new_token() {
        let mut server = Server::new_async().await;
        let expired = server
            .mock("GET", "/api/protected")
            .match_header("authorization", "Bearer A1")
            .with_status(401)
            .with_body(r#"{"message":"expired"}"#)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", REFRESH_PATH)
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::Json(json!({ "refreshToken": "R1" })))
            .with_status(200)
            .with_body(token_body("A2", "R1"))
            .expect(1)
            .create_async()
            .await;
        let replay = server
            .mock("GET", "/api/protected")
            .match_header("authorization", "Bearer A2")
            .with_status(200)
            .with_body("protected data")
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::with_tokens(Some("A1"), Some("R1")));
        let p = pipeline(&server, store.clone());

        let response = p.send(RequestDescriptor::get("/api/protected")).await.unwrap();
        assert_eq!(response.text().await.unwrap(), "protected data");

        assert_eq!(store.get(TokenKey::Access).await.unwrap().as_deref(), Some("A2"));
        assert_eq!(store.get(TokenKey::Refresh).await.unwrap().as_deref(), Some("R1"));
        expired.assert_async().await;
        refresh.assert_async().await;
        replay.assert_async().await;
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_stored() {
        let mut server = Server::new_async().await;
        let _protected = server
            .mock("GET", "/api/protected")
            .match_header("authorization", "Bearer A1")
            .with_status(401)
            .create_async()
            .await;
        let _refresh = server
            .mock("POST", REFRESH_PATH)
            .with_status(200)
            .with_body(token_body("A2", "R2"))
            .create_async()
            .await;
        let _replay = server
            .mock("GET", "/api/protected")
            .match_header("authorization", "Bearer A2")
            .with_status(200)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::with_tokens(Some("A1"), Some("R1")));
        let p = pipeline(&server, store.clone());
        p.send(RequestDescriptor::get("/api/protected")).await.unwrap();

        assert_eq!(store.get(TokenKey::Refresh).await.unwrap().as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn test_replay_failure_is_returned_without_second_refresh() {
        let mut server = Server::new_async().await;
        let protected = server
            .mock("GET", "/api/protected")
            .with_status(401)
            .with_body(r#"{"message":"still unauthorized"}"#)
            .expect(2)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", REFRESH_PATH)
            .with_status(200)
            .with_body(token_body("A2", "R1"))
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::with_tokens(Some("A1"), Some("R1")));
        let p = pipeline(&server, store.clone());

        let err = p.send(RequestDescriptor::get("/api/protected")).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(ref m) if m == "still unauthorized"));

        // The refresh itself succeeded, so the new tokens stay
        assert_eq!(store.get(TokenKey::Access).await.unwrap().as_deref(), Some("A2"));
        protected.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_tokens_and_returns_original_401() {
        let mut server = Server::new_async().await;
        let protected = server
            .mock("GET", "/api/protected")
            .match_header("authorization", Matcher::Missing)
            .with_status(401)
            .with_body(r#"{"message":"original"}"#)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", REFRESH_PATH)
            .match_body(Matcher::Json(json!({ "refreshToken": "R1" })))
            .with_status(401)
            .with_body(r#"{"message":"refresh token expired"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::with_tokens(None, Some("R1")));
        let p = pipeline(&server, store.clone());
        let mut events = p.session().subscribe();

        let err = p.send(RequestDescriptor::get("/api/protected")).await.unwrap_err();
        match err {
            ApiError::Unauthorized(m) => assert_eq!(m, "original"),
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(store.is_empty());
        assert!(!p.session().check_session().await);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::SessionExpired);
        protected.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_server_error_ends_session() {
        let mut server = Server::new_async().await;
        let _protected = server
            .mock("GET", "/api/protected")
            .with_status(401)
            .create_async()
            .await;
        let _refresh = server
            .mock("POST", REFRESH_PATH)
            .with_status(500)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::with_tokens(Some("A1"), Some("R1")));
        let p = pipeline(&server, store.clone());

        let err = p.send(RequestDescriptor::get("/api/protected")).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_refresh_response_ends_session() {
        let mut server = Server::new_async().await;
        let _protected = server
            .mock("GET", "/api/protected")
            .with_status(401)
            .create_async()
            .await;
        let _refresh = server
            .mock("POST", REFRESH_PATH)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::with_tokens(Some("A1"), Some("R1")));
        let p = pipeline(&server, store.clone());

        let err = p.send(RequestDescriptor::get("/api/protected")).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_401_without_refresh_token_keeps_store() {
        let mut server = Server::new_async().await;
        let _protected = server
            .mock("GET", "/api/protected")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", REFRESH_PATH)
            .expect(0)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::with_tokens(Some("A1"), None));
        let p = pipeline(&server, store.clone());

        let err = p.send(RequestDescriptor::get("/api/protected")).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(store.get(TokenKey::Access).await.unwrap().as_deref(), Some("A1"));
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_other_failures_do_not_refresh() {
        let mut server = Server::new_async().await;
        let _protected = server
            .mock("GET", "/api/protected")
            .with_status(403)
            .with_body(r#"{"message":"forbidden"}"#)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", REFRESH_PATH)
            .expect(0)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::with_tokens(Some("A1"), Some("R1")));
        let p = pipeline(&server, store.clone());

        let err = p.send(RequestDescriptor::get("/api/protected")).await.unwrap_err();
        assert!(matches!(err, ApiError::AccessDenied(ref m) if m == "forbidden"));
        assert!(!store.is_empty());
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreadable_store_sends_without_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/public")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let p = pipeline(&server, Arc::new(BrokenStore));
        assert!(p.send(RequestDescriptor::get("/api/public")).await.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_token_write_ends_session() {
        let mut server = Server::new_async().await;
        let protected = server
            .mock("GET", "/api/protected")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let _refresh = server
            .mock("POST", REFRESH_PATH)
            .with_status(200)
            .with_body(token_body("A2", "R1"))
            .expect(1)
            .create_async()
            .await;

        let inner = MemoryStore::with_tokens(Some("A1"), Some("R1"));
        let store = Arc::new(ReadOnlyStore(inner));
        let p = pipeline(&server, store.clone());

        let err = p.send(RequestDescriptor::get("/api/protected")).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(store.0.is_empty());
        protected.assert_async().await;
    }
}
