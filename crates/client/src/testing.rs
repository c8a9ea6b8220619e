//! Scripted transport for tests.
//!
//! [`ScriptedExecutor`] answers requests from per-route scripts instead of the
//! network and records every call it sees, including the bearer token that
//! was attached. Replies can be immediate, held behind a [`Gate`] the test
//! releases later, computed from the request, or never delivered at all.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use storefront_sync_core::AccessCredential;
use tokio::sync::oneshot;

use crate::error::TransportError;
use crate::pipeline::{ApiRequest, ApiResponse, HttpExecutor};

type Handler = Arc<dyn Fn(&ApiRequest, Option<&AccessCredential>) -> ApiResponse + Send + Sync>;

enum Reply {
    Respond(ApiResponse),
    Fail(TransportError),
    Gated(oneshot::Receiver<Result<ApiResponse, TransportError>>),
    Hang,
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Reply>,
    handler: Option<Handler>,
}

/// One request observed by the executor.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    /// Bearer token attached to the request, if any.
    pub token: Option<String>,
    pub body: Option<Value>,
}

/// Releases a reply registered with [`ScriptedExecutor::respond_when`].
#[derive(Debug)]
pub struct Gate {
    sender: oneshot::Sender<Result<ApiResponse, TransportError>>,
}

impl Gate {
    /// Deliver a response to the waiting request.
    pub fn respond(self, status: StatusCode, body: Option<Value>) {
        let _ = self.sender.send(Ok(ApiResponse::new(status, body)));
    }

    /// Fail the waiting request at the transport level.
    pub fn fail(self, error: TransportError) {
        let _ = self.sender.send(Err(error));
    }
}

/// In-memory [`HttpExecutor`] driven by per-route scripts.
///
/// Queued replies are consumed in order. Once a route's queue is empty its
/// handler (if any) answers; otherwise the call gets a 500 naming the route.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<(Method, String), Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedExecutor {
    /// Create an executor with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an immediate response.
    pub fn respond(&self, method: Method, path: &str, status: StatusCode, body: Option<Value>) {
        self.push(method, path, Reply::Respond(ApiResponse::new(status, body)));
    }

    /// Queue a transport failure.
    pub fn fail(&self, method: Method, path: &str, error: TransportError) {
        self.push(method, path, Reply::Fail(error));
    }

    /// Queue a reply that is held until the returned gate is released.
    #[must_use]
    pub fn respond_when(&self, method: Method, path: &str) -> Gate {
        let (sender, receiver) = oneshot::channel();
        self.push(method, path, Reply::Gated(receiver));
        Gate { sender }
    }

    /// Queue a reply that never arrives.
    pub fn hang(&self, method: Method, path: &str) {
        self.push(method, path, Reply::Hang);
    }

    /// Answer every unqueued call on a route with `handler`.
    pub fn handle<F>(&self, method: Method, path: &str, handler: F)
    where
        F: Fn(&ApiRequest, Option<&AccessCredential>) -> ApiResponse + Send + Sync + 'static,
    {
        self.lock_scripts()
            .entry((method, path.to_string()))
            .or_default()
            .handler = Some(Arc::new(handler));
    }

    /// Answer every unqueued call on a route with a fixed response.
    pub fn respond_always(&self, method: Method, path: &str, status: StatusCode, body: Option<Value>) {
        self.handle(method, path, move |_, _| ApiResponse::new(status, body.clone()));
    }

    /// Every call seen so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock_calls().clone()
    }

    /// Number of calls seen on a route.
    #[must_use]
    pub fn count(&self, method: Method, path: &str) -> usize {
        self.lock_calls()
            .iter()
            .filter(|call| call.method == method && call.path == path)
            .count()
    }

    /// Wait until at least `n` calls have reached a route.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive within five seconds.
    pub async fn wait_for_calls(&self, method: Method, path: &str, n: usize) {
        let arrived = tokio::time::timeout(Duration::from_secs(5), async {
            while self.count(method.clone(), path) < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(arrived.is_ok(), "expected {n} calls to {method} {path}");
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        self.lock_scripts()
            .entry((method, path.to_string()))
            .or_default()
            .queue
            .push_back(reply);
    }

    fn next_reply(&self, request: &ApiRequest, credential: Option<&AccessCredential>) -> Reply {
        let mut scripts = self.lock_scripts();
        let Some(script) = scripts.get_mut(&(request.method.clone(), request.path.clone())) else {
            return unscripted(request);
        };
        if let Some(reply) = script.queue.pop_front() {
            return reply;
        }
        match &script.handler {
            Some(handler) => Reply::Respond(handler(request, credential)),
            None => unscripted(request),
        }
    }

    fn lock_scripts(&self) -> MutexGuard<'_, HashMap<(Method, String), Script>> {
        self.scripts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_calls(&self) -> MutexGuard<'_, Vec<RecordedCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unscripted(request: &ApiRequest) -> Reply {
    Reply::Respond(ApiResponse::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        Some(serde_json::json!({
            "message": format!("no scripted reply for {} {}", request.method, request.path)
        })),
    ))
}

#[async_trait]
impl HttpExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        request: &ApiRequest,
        credential: Option<&AccessCredential>,
    ) -> Result<ApiResponse, TransportError> {
        self.lock_calls().push(RecordedCall {
            method: request.method.clone(),
            path: request.path.clone(),
            token: credential.map(|c| c.expose_token().to_string()),
            body: request.body.clone(),
        });

        match self.next_reply(request, credential) {
            Reply::Respond(response) => Ok(response),
            Reply::Fail(error) => Err(error),
            Reply::Gated(receiver) => receiver
                .await
                .unwrap_or_else(|_| Err(TransportError::Io("gate dropped".to_string()))),
            Reply::Hang => futures::future::pending().await,
        }
    }
}

/// Handler that accepts only `token` and answers 401 to anything else.
pub fn require_token(
    token: &'static str,
    status: StatusCode,
    body: Option<Value>,
) -> impl Fn(&ApiRequest, Option<&AccessCredential>) -> ApiResponse + Send + Sync + 'static {
    move |_, credential| {
        if credential.is_some_and(|c| c.expose_token() == token) {
            ApiResponse::new(status, body.clone())
        } else {
            ApiResponse::new(StatusCode::UNAUTHORIZED, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_queue_then_handler_then_unscripted() {
        let executor = ScriptedExecutor::new();
        executor.respond(Method::GET, "/cart", StatusCode::OK, Some(json!({"items": []})));
        executor.respond_always(Method::GET, "/cart", StatusCode::NO_CONTENT, None);

        let request = ApiRequest::get("/cart");
        let first = executor.execute(&request, None).await.expect("first");
        let second = executor.execute(&request, None).await.expect("second");
        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(second.status, StatusCode::NO_CONTENT);

        let other = executor
            .execute(&ApiRequest::get("/favorites"), None)
            .await
            .expect("unscripted");
        assert_eq!(other.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(executor.count(Method::GET, "/cart"), 2);
    }

    #[tokio::test]
    async fn test_records_token() {
        let executor = ScriptedExecutor::new();
        executor.handle(
            Method::GET,
            "/cart",
            require_token("good", StatusCode::OK, None),
        );

        let request = ApiRequest::get("/cart");
        let rejected = executor
            .execute(&request, Some(&AccessCredential::new("bad")))
            .await
            .expect("response");
        let accepted = executor
            .execute(&request, Some(&AccessCredential::new("good")))
            .await
            .expect("response");

        assert_eq!(rejected.status, StatusCode::UNAUTHORIZED);
        assert_eq!(accepted.status, StatusCode::OK);
        let tokens: Vec<_> = executor.calls().into_iter().map(|c| c.token).collect();
        assert_eq!(tokens, vec![Some("bad".to_string()), Some("good".to_string())]);
    }
}
