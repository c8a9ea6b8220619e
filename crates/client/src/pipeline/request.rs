//! Request and response values exchanged with the HTTP executor.

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// An outbound API call, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the API base URL (e.g., `/cart/items`).
    pub path: String,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Whether the current credential is attached and 401s are intercepted.
    pub with_credentials: bool,
}

impl ApiRequest {
    /// Create a request with the given method and path.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
            with_credentials: true,
        }
    }

    /// `GET path`.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path`.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PUT path`.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `PATCH path`.
    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// `DELETE path`.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send without the bearer credential and without 401 interception.
    #[must_use]
    pub const fn without_credentials(mut self) -> Self {
        self.with_credentials = false;
        self
    }
}

/// A response that made it back from the server, whatever its status.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Parsed JSON body; `None` for empty or non-JSON bodies.
    pub body: Option<serde_json::Value>,
    /// `Retry-After` in seconds, when the server sent one.
    pub retry_after: Option<u64>,
}

impl ApiResponse {
    /// Response with a status and JSON body.
    #[must_use]
    pub const fn new(status: StatusCode, body: Option<serde_json::Value>) -> Self {
        Self {
            status,
            body,
            retry_after: None,
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Deserialize the body.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Decode` if the body is missing or has the wrong shape.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let body = self.body.clone().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(body)?)
    }

    /// Human-readable message from an error body (`message` or `error` field).
    #[must_use]
    pub fn error_message(&self) -> String {
        self.body
            .as_ref()
            .and_then(|body| {
                body.get("message")
                    .or_else(|| body.get("error"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| {
                self.status
                    .canonical_reason()
                    .unwrap_or("unexpected response")
                    .to_string()
            })
    }

    /// Map a non-success status onto the error taxonomy.
    ///
    /// Success responses pass through unchanged.
    ///
    /// # Errors
    ///
    /// Returns the `ApiError` matching the response status.
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            return Ok(self);
        }

        let message = self.error_message();
        Err(match self.status {
            StatusCode::UNAUTHORIZED => ApiError::AuthExpired,
            StatusCode::NOT_FOUND | StatusCode::GONE => ApiError::NotFound(message),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => ApiError::Conflict(message),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ApiError::Timeout,
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited(self.retry_after.unwrap_or(1)),
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
                ApiError::Network(message)
            }
            status => ApiError::Unknown {
                status: status.as_u16(),
                message,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn status_error(status: StatusCode, body: Option<serde_json::Value>) -> ApiError {
        ApiResponse::new(status, body)
            .error_for_status()
            .expect_err("non-success status")
    }

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::patch("/cart/items/v-1")
            .json(json!({"quantity": 2}))
            .header("X-Request-Id", "abc");

        assert_eq!(request.method, Method::PATCH);
        assert_eq!(request.path, "/cart/items/v-1");
        assert!(request.with_credentials);
        assert_eq!(request.headers.len(), 1);

        let raw = ApiRequest::post("/auth/refresh").without_credentials();
        assert!(!raw.with_credentials);
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, None),
            ApiError::AuthExpired
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, Some(json!({"message": "no such line"}))),
            ApiError::NotFound(ref m) if m == "no such line"
        ));
        assert!(matches!(
            status_error(StatusCode::CONFLICT, Some(json!({"error": "out of stock"}))),
            ApiError::Conflict(ref m) if m == "out of stock"
        ));
        assert!(matches!(
            status_error(StatusCode::GATEWAY_TIMEOUT, None),
            ApiError::Timeout
        ));
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, None),
            ApiError::Network(_)
        ));
        assert!(matches!(
            status_error(StatusCode::IM_A_TEAPOT, None),
            ApiError::Unknown { status: 418, .. }
        ));
    }

    #[test]
    fn test_rate_limit_uses_retry_after() {
        let mut response = ApiResponse::new(StatusCode::TOO_MANY_REQUESTS, None);
        response.retry_after = Some(30);
        assert!(matches!(
            response.error_for_status(),
            Err(ApiError::RateLimited(30))
        ));
    }

    #[test]
    fn test_json_decode() {
        let response = ApiResponse::new(StatusCode::OK, Some(json!({"count": 3})));

        #[derive(serde::Deserialize)]
        struct Count {
            count: u32,
        }

        let parsed: Count = response.json().expect("decode");
        assert_eq!(parsed.count, 3);

        let empty = ApiResponse::new(StatusCode::OK, None);
        assert!(matches!(empty.json::<Count>(), Err(ApiError::Decode(_))));
    }
}
