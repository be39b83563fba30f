use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use super::ApiError;

/// Immutable description of an outbound request, replayable as many times
/// as the pipeline needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/api/protected`
    pub path: String,
    pub body: Option<Value>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self, ApiError> {
        Ok(self.with_body(serde_json::to_value(body)?))
    }
}

/// A request moving through the pipeline together with its one-shot retry flag.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub request: RequestDescriptor,
    pub retried: bool,
}

impl PendingRequest {
    pub fn new(request: RequestDescriptor) -> Self {
        Self {
            request,
            retried: false,
        }
    }

    pub fn mark_retried(self) -> Self {
        Self {
            retried: true,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_builders() {
        let req = RequestDescriptor::post("/api/trips")
            .with_json(&json!({ "name": "Jeju" }))
            .unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.path, "/api/trips");
        assert_eq!(req.body, Some(json!({ "name": "Jeju" })));

        assert_eq!(RequestDescriptor::get("/api/me").body, None);
    }

    #[test]
    fn test_mark_retried_keeps_request() {
        let pending = PendingRequest::new(RequestDescriptor::get("/api/protected"));
        assert!(!pending.retried);

        let retried = pending.clone().mark_retried();
        assert!(retried.retried);
        assert_eq!(retried.request, pending.request);
    }
}
