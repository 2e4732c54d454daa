use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use floodgate::clock;
use floodgate::config::Config;
use floodgate::counter_store::MemoryCounterStore;
use floodgate::handlers::{AppState, SharedState};
use floodgate::identity::KeyStrategy;
use floodgate::policy_config::PolicyConfig;
use floodgate::resilience::BreakerPhase;
use floodgate::server::{create_app, Server};

fn app_with(policy_json: &str) -> (Router, SharedState) {
    let policy = PolicyConfig::from_json(policy_json).unwrap();
    let clock = clock::system();
    let store = Arc::new(MemoryCounterStore::new(clock.clone()));
    let state = Arc::new(AppState::new(policy, store, clock, KeyStrategy::IpAddress));
    (create_app(state.clone()), state)
}

fn get(uri: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-real-ip", ip)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_token_bucket_route_denies_when_empty() {
    let (app, _) = app_with(r#"{"tokenBucket": {"capacity": 2, "refillRatePerSecond": 0.01}}"#);

    for _ in 0..2 {
        let response = app.clone().oneshot(get("/api/token-bucket", "10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert!(response.headers().get("x-ratelimit-remaining").is_none());
    }

    let response = app.clone().oneshot(get("/api/token-bucket", "10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body = json_body(response).await;
    assert_eq!(body["algorithm"], "token_bucket");
    assert!(body["error"].is_string());

    // Another caller has its own bucket.
    let response = app.oneshot(get("/api/token-bucket", "10.0.0.2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_fixed_window_route_counts_down() {
    let (app, _) = app_with(r#"{"window": {"sizeSeconds": 60, "maxRequests": 2}}"#);

    let first = app.clone().oneshot(get("/api/fixed-window", "10.0.0.1")).await.unwrap();
    assert_eq!(first.headers()["x-ratelimit-remaining"], "1");
    let second = app.clone().oneshot(get("/api/fixed-window", "10.0.0.1")).await.unwrap();
    assert_eq!(second.headers()["x-ratelimit-remaining"], "0");

    let third = app.oneshot(get("/api/fixed-window", "10.0.0.1")).await.unwrap();
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(third.headers()["retry-after"], "60");
    assert_eq!(json_body(third).await["algorithm"], "fixed_window");
}

#[tokio::test]
async fn test_sliding_log_route_and_metrics() {
    let (app, _) = app_with(r#"{"window": {"sizeSeconds": 10, "maxRequests": 1}}"#);

    let first = app.clone().oneshot(get("/api/sliding-log", "10.0.0.1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = app.clone().oneshot(get("/api/sliding-log", "10.0.0.1")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let metrics = json_body(app.oneshot(get("/metrics", "10.0.0.1")).await.unwrap()).await;
    assert_eq!(metrics["per_algorithm"]["sliding_log"]["allowed_requests"], 1);
    assert_eq!(metrics["per_algorithm"]["sliding_log"]["denied_requests"], 1);
    assert_eq!(metrics["global"]["total_requests"], 2);
    assert_eq!(metrics["tracked_identities"]["sliding_log"], 1);
}

#[tokio::test]
async fn test_unlimited_routes_are_not_gated() {
    let (app, _) = app_with(r#"{"window": {"maxRequests": 1}}"#);

    for _ in 0..3 {
        let response = app.clone().oneshot(get("/health", "10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }
}

#[tokio::test]
async fn test_breaker_short_circuits_after_failure() {
    let (app, state) = app_with("{}");

    let failed = app
        .clone()
        .oneshot(get("/api/dependency?fail=true&delay_ms=0", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(failed).await["policy"], "operation");
    assert_eq!(state.breaker.phase(), BreakerPhase::Open);

    let calls = state.dependency.calls();
    let rejected = app
        .clone()
        .oneshot(get("/api/dependency?fail=false&delay_ms=0", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(rejected).await["policy"], "circuit_breaker");
    assert_eq!(state.dependency.calls(), calls);

    let snapshots = json_body(app.clone().oneshot(get("/api/breaker", "10.0.0.1")).await.unwrap()).await;
    assert_eq!(snapshots[0]["name"], "dependency");
    assert_eq!(snapshots[0]["phase"], "open");

    let ready = app.oneshot(get("/ready", "10.0.0.1")).await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
    assert_eq!(json_body(ready).await["status"], "degraded");
}

#[tokio::test]
async fn test_slow_dependency_times_out() {
    let (app, _) = app_with(r#"{"timeout": {"limitMs": 50}}"#);

    let response = app
        .oneshot(get("/api/slow?fail=false&delay_ms=1000", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(json_body(response).await["policy"], "timeout");
}

const FLAKY_POLICY: &str = r#"{
    "retry": {"maxAttempts": 3, "baseDelayMs": 1},
    "breaker": {"volumeThreshold": 5}
}"#;

#[tokio::test]
async fn test_flaky_dependency_recovers_with_retry() {
    let (app, _) = app_with(FLAKY_POLICY);

    let recovered = app.oneshot(get("/api/flaky?failures=2", "10.0.0.1")).await.unwrap();
    assert_eq!(recovered.status(), StatusCode::OK);
    assert_eq!(json_body(recovered).await["attempts"], 3);
}

#[tokio::test]
async fn test_flaky_dependency_exhausts_then_breaker_rejects() {
    let (app, state) = app_with(FLAKY_POLICY);

    // Four failures stay below the volume threshold of five.
    let exhausted = app.clone().oneshot(get("/api/flaky?failures=10", "10.0.0.1")).await.unwrap();
    assert_eq!(exhausted.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(exhausted).await;
    assert_eq!(body["policy"], "retry");
    assert_eq!(body["attempts"], 4);

    // The fifth failure opens the breaker; the next attempt is rejected
    // outright instead of being retried into a retry exhaustion.
    let calls = state.dependency.calls();
    let rejected = app.oneshot(get("/api/flaky?failures=10", "10.0.0.1")).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(rejected).await;
    assert_eq!(body["policy"], "circuit_breaker");
    assert!(body.get("attempts").is_none());
    assert_eq!(state.dependency.calls(), calls + 1);
    assert_eq!(state.flaky_breaker.phase(), BreakerPhase::Open);
}

#[tokio::test]
async fn test_ready_with_memory_store() {
    let (app, _) = app_with("{}");

    let response = app.oneshot(get("/ready", "10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["counter_store"]["backend"], "memory");
}

#[tokio::test]
async fn test_server_over_socket() {
    let mut config = Config::default();
    config.bind_addr = "127.0.0.1:0".parse().unwrap();
    let policy = PolicyConfig::from_json(r#"{"tokenBucket": {"capacity": 1, "refillRatePerSecond": 0.01}}"#).unwrap();

    let server = Server::new(&config, policy).unwrap();
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(listener, async {
        stopped.await.ok();
    }));

    let client = reqwest::Client::new();
    let health = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);

    let url = format!("http://{}/api/token-bucket", addr);
    let first = client.get(&url).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert!(first.headers().contains_key("x-request-id"));

    let second = client.get(&url).send().await.unwrap();
    assert_eq!(second.status(), 429);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["algorithm"], "token_bucket");

    stop.send(()).ok();
    handle.await.unwrap().unwrap();
}
