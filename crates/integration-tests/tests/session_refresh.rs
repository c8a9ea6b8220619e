//! Integration tests for the credential refresh protocol.
//!
//! Concurrent requests are spawned onto the test runtime while the refresh
//! response is held behind a gate, so every request is known to be waiting
//! on the same refresh before it settles.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::json;
use storefront_sync::auth::SessionEvent;
use storefront_sync::{ApiError, ApiRequest};
use storefront_sync_integration_tests::{TestContext, require_token};

fn spawn_get(ctx: &TestContext, path: &'static str) -> tokio::task::JoinHandle<Result<(), ApiError>> {
    let pipeline = ctx.pipeline.clone();
    tokio::spawn(async move { pipeline.send(ApiRequest::get(path)).await.map(|_| ()) })
}

// =============================================================================
// Single-flight
// =============================================================================

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let ctx = TestContext::with_token("stale");
    ctx.executor.handle(
        Method::GET,
        "/cart",
        require_token("fresh", StatusCode::OK, Some(json!({"items": []}))),
    );
    let gate = ctx.executor.respond_when(Method::POST, "/auth/refresh");

    let requests: Vec<_> = (0..5).map(|_| spawn_get(&ctx, "/cart")).collect();

    // Each request joins the refresh in the same poll that records its 401
    ctx.executor.wait_for_calls(Method::GET, "/cart", 5).await;
    assert_eq!(ctx.executor.count(Method::POST, "/auth/refresh"), 1);

    gate.respond(StatusCode::OK, Some(json!({"access_token": "fresh"})));

    for request in requests {
        request.await.expect("join").expect("replayed");
    }

    assert_eq!(ctx.executor.count(Method::POST, "/auth/refresh"), 1);
    let replays: Vec<_> = ctx
        .executor
        .calls()
        .into_iter()
        .filter(|call| call.path == "/cart")
        .skip(5)
        .map(|call| call.token)
        .collect();
    assert_eq!(replays.len(), 5);
    assert!(replays.iter().all(|t| t.as_deref() == Some("fresh")));
    assert_eq!(ctx.current_token().as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_401_after_refresh_settled_starts_new_cycle() {
    let ctx = TestContext::with_token("first");
    ctx.executor.respond(Method::GET, "/cart", StatusCode::UNAUTHORIZED, None);
    ctx.executor.respond(Method::GET, "/cart", StatusCode::OK, None);
    ctx.executor.respond(Method::GET, "/cart", StatusCode::UNAUTHORIZED, None);
    ctx.executor.respond(Method::GET, "/cart", StatusCode::OK, None);
    ctx.refresh_succeeds("second");
    ctx.refresh_succeeds("third");

    ctx.pipeline.send(ApiRequest::get("/cart")).await.expect("first");
    ctx.pipeline.send(ApiRequest::get("/cart")).await.expect("second");

    assert_eq!(ctx.executor.count(Method::POST, "/auth/refresh"), 2);
    assert_eq!(ctx.current_token().as_deref(), Some("third"));
}

#[tokio::test]
async fn test_replayed_request_rejected_again_does_not_refresh_twice() {
    let ctx = TestContext::with_token("stale");
    ctx.executor
        .respond_always(Method::GET, "/favorites", StatusCode::UNAUTHORIZED, None);
    ctx.refresh_succeeds("fresh");

    let err = ctx
        .pipeline
        .send(ApiRequest::get("/favorites"))
        .await
        .expect_err("rejected after replay");

    assert!(matches!(err, ApiError::AuthInvalid { .. }));
    assert_eq!(ctx.executor.count(Method::POST, "/auth/refresh"), 1);
    assert_eq!(ctx.executor.count(Method::GET, "/favorites"), 2);
}

#[tokio::test]
async fn test_transport_errors_do_not_refresh() {
    let ctx = TestContext::with_token("good");
    ctx.executor.fail(
        Method::GET,
        "/cart",
        storefront_sync::error::TransportError::Io("connection refused".to_string()),
    );

    let err = ctx
        .pipeline
        .send(ApiRequest::get("/cart"))
        .await
        .expect_err("transport failure");

    assert!(matches!(err, ApiError::Network(_)));
    assert_eq!(ctx.executor.count(Method::POST, "/auth/refresh"), 0);
    assert!(ctx.pipeline.is_authenticated());
}

// =============================================================================
// Refresh failure
// =============================================================================

#[tokio::test]
async fn test_refresh_failure_fans_out_with_single_redirect() {
    let ctx = TestContext::with_token("stale");
    ctx.pipeline.navigation().record_route("/products/tee");
    ctx.executor
        .respond_always(Method::GET, "/cart", StatusCode::UNAUTHORIZED, None);
    let gate = ctx.executor.respond_when(Method::POST, "/auth/refresh");
    let mut events = ctx.pipeline.events();

    let requests: Vec<_> = (0..3).map(|_| spawn_get(&ctx, "/cart")).collect();
    ctx.executor.wait_for_calls(Method::GET, "/cart", 3).await;

    gate.respond(StatusCode::UNAUTHORIZED, None);

    let mut redirects = Vec::new();
    for request in requests {
        let err = request.await.expect("join").expect_err("session lost");
        assert!(matches!(err, ApiError::AuthInvalid { .. }));
        if let Some(intent) = err.navigation() {
            redirects.push(intent.clone());
        }
    }

    assert_eq!(redirects.len(), 1);
    assert_eq!(redirects[0].target, "/login");
    assert_eq!(redirects[0].return_to.as_deref(), Some("/products/tee"));
    assert!(ctx.current_token().is_none());
    assert_eq!(ctx.executor.count(Method::POST, "/auth/refresh"), 1);
    assert!(matches!(
        events.recv().await.expect("event"),
        SessionEvent::Expired { navigation: Some(_) }
    ));
}

#[tokio::test]
async fn test_no_redirect_while_on_login_route() {
    let ctx = TestContext::with_token("stale");
    ctx.pipeline.navigation().record_route("/login?return_to=/cart");
    ctx.executor
        .respond_always(Method::GET, "/cart", StatusCode::UNAUTHORIZED, None);
    ctx.executor
        .respond_always(Method::GET, "/favorites", StatusCode::UNAUTHORIZED, None);
    let gate = ctx.executor.respond_when(Method::POST, "/auth/refresh");

    let cart = spawn_get(&ctx, "/cart");
    let favorites = spawn_get(&ctx, "/favorites");
    ctx.executor.wait_for_calls(Method::GET, "/cart", 1).await;
    ctx.executor.wait_for_calls(Method::GET, "/favorites", 1).await;

    gate.respond(StatusCode::UNAUTHORIZED, None);

    for chain in [cart, favorites] {
        let err = chain.await.expect("join").expect_err("session lost");
        assert!(matches!(err, ApiError::AuthInvalid { navigation: None }));
    }
}

#[tokio::test]
async fn test_redirect_not_repeated_until_performed() {
    let ctx = TestContext::with_token("stale");
    ctx.pipeline.navigation().record_route("/cart");
    ctx.executor
        .respond_always(Method::GET, "/cart", StatusCode::UNAUTHORIZED, None);
    ctx.refresh_fails();
    ctx.refresh_fails();

    let first = ctx.pipeline.send(ApiRequest::get("/cart")).await.expect_err("lost");
    assert!(first.navigation().is_some());

    // No credential now, but the 401 still routes through a refresh attempt
    let second = ctx.pipeline.send(ApiRequest::get("/cart")).await.expect_err("lost");
    assert!(second.navigation().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_timeout_is_refresh_failure() {
    let ctx = TestContext::with_refresh_timeout("stale", Duration::from_secs(3));
    ctx.pipeline.navigation().record_route("/cart");
    ctx.executor
        .respond_always(Method::GET, "/cart", StatusCode::UNAUTHORIZED, None);
    ctx.executor.hang(Method::POST, "/auth/refresh");

    let err = ctx
        .pipeline
        .send(ApiRequest::get("/cart"))
        .await
        .expect_err("timed out");

    assert!(err.navigation().is_some());
    assert!(!ctx.pipeline.is_authenticated());
    assert!(!ctx.pipeline.coordinator().is_refreshing());
}

// =============================================================================
// Session changes during refresh
// =============================================================================

#[tokio::test]
async fn test_logout_during_refresh_settles_harmlessly() {
    let ctx = TestContext::with_token("stale");
    ctx.executor
        .respond_always(Method::GET, "/cart", StatusCode::UNAUTHORIZED, None);
    let gate = ctx.executor.respond_when(Method::POST, "/auth/refresh");

    let request = spawn_get(&ctx, "/cart");
    ctx.executor.wait_for_calls(Method::POST, "/auth/refresh", 1).await;

    ctx.pipeline.logout();
    gate.respond(StatusCode::OK, Some(json!({"access_token": "late"})));

    let err = request.await.expect("join").expect_err("logged out");
    assert!(matches!(err, ApiError::AuthInvalid { navigation: None }));
    assert!(ctx.current_token().is_none());
}

#[tokio::test]
async fn test_login_during_refresh_wins() {
    let ctx = TestContext::with_token("stale");
    ctx.executor.handle(
        Method::GET,
        "/cart",
        require_token("from-login", StatusCode::OK, None),
    );
    let gate = ctx.executor.respond_when(Method::POST, "/auth/refresh");

    let request = spawn_get(&ctx, "/cart");
    ctx.executor.wait_for_calls(Method::POST, "/auth/refresh", 1).await;

    ctx.pipeline
        .login(storefront_sync_core::AccessCredential::new("from-login"), None);
    gate.respond(StatusCode::OK, Some(json!({"access_token": "from-refresh"})));

    request.await.expect("join").expect("replayed with login credential");
    assert_eq!(ctx.current_token().as_deref(), Some("from-login"));
}
