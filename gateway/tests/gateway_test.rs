// Integration tests for the gateway router against mock upstreams

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use city_gateway::config::{
    BreakerSettings, BreakersConfig, FilterConfig, PredicateConfig, RouteConfig,
};
use city_gateway::{create_router, CircuitState, GatewayConfig, GatewayState, FALLBACK_HEADER};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn breaker_settings(failure_threshold: u32, cooldown_ms: u64) -> BreakersConfig {
    BreakersConfig {
        default: BreakerSettings {
            failure_threshold,
            cooldown_ms,
            ..BreakerSettings::default()
        },
        named: HashMap::new(),
    }
}

/// Default route table, pointed at `upstream`.
fn create_test_app(upstream: &str, breakers: BreakersConfig) -> (Router, Arc<GatewayState>) {
    let mut config = GatewayConfig::default();
    config.defaults.upstream = upstream.to_string();
    config.defaults.timeout_ms = 2000;
    config.breakers = breakers;

    let state = Arc::new(GatewayState::from_config(&config).unwrap());
    (create_router(Arc::clone(&state)), state)
}

async fn send(app: &Router, uri: &str, host: Option<&str>) -> (StatusCode, Option<String>, String) {
    let mut request = Request::builder().method("GET").uri(uri);
    if let Some(host) = host {
        request = request.header("host", host);
    }

    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let fallback = response
        .headers()
        .get(FALLBACK_HEADER)
        .map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, fallback, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_path_route_adds_header() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/get")
        .match_header("hello", "World")
        .with_status(200)
        .with_body("upstream says hi")
        .expect(1)
        .create_async()
        .await;

    let (app, _) = create_test_app(&server.url(), BreakersConfig::default());
    let (status, fallback, body) = send(&app, "/get", Some("localhost")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(fallback, None);
    assert_eq!(body, "upstream says hi");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_query_string_forwarded() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/get")
        .match_query(mockito::Matcher::UrlEncoded("city".into(), "grid".into()))
        .with_status(200)
        .create_async()
        .await;

    let (app, _) = create_test_app(&server.url(), BreakersConfig::default());
    let (status, _, _) = send(&app, "/get?city=grid", None).await;

    assert_eq!(status, StatusCode::OK);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unmatched_request_is_not_found() {
    let server = mockito::Server::new_async().await;
    let (app, _) = create_test_app(&server.url(), BreakersConfig::default());

    let (status, _, body) = send(&app, "/nowhere", Some("localhost")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("/nowhere"));
}

#[tokio::test]
async fn test_fallback_served_directly() {
    let server = mockito::Server::new_async().await;
    let (app, _) = create_test_app(&server.url(), BreakersConfig::default());

    let (status, fallback, body) = send(&app, "/fallback", Some("localhost")).await;

    assert_eq!(status, StatusCode::NON_AUTHORITATIVE_INFORMATION);
    assert_eq!(fallback, None);
    assert_eq!(body, "fallback");
}

#[tokio::test]
async fn test_healthy_protected_route_passes_through() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/anything")
        .with_status(200)
        .with_body("fresh")
        .create_async()
        .await;

    let (app, state) = create_test_app(&server.url(), breaker_settings(2, 60_000));
    let (status, fallback, body) = send(&app, "/anything", Some("www.circuitbreaker.com")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(fallback, None);
    assert_eq!(body, "fresh");
    assert_eq!(
        state.breakers().get_or_create("mycmd").state(),
        CircuitState::Closed
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_client_error_status_is_not_a_breaker_failure() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/missing")
        .with_status(404)
        .expect(3)
        .create_async()
        .await;

    let (app, state) = create_test_app(&server.url(), breaker_settings(2, 60_000));
    for _ in 0..3 {
        let (status, fallback, _) = send(&app, "/missing", Some("a.circuitbreaker.com")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(fallback, None);
    }

    assert_eq!(
        state.breakers().get_or_create("mycmd").state(),
        CircuitState::Closed
    );
}

/// Upstream 5xx responses open the breaker; once open the upstream is not called.
#[tokio::test]
async fn test_breaker_opens_and_short_circuits() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/status/500")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let (app, state) = create_test_app(&server.url(), breaker_settings(2, 60_000));

    for _ in 0..3 {
        let (status, fallback, body) =
            send(&app, "/status/500", Some("www.circuitbreaker.com:8080")).await;
        assert_eq!(status, StatusCode::NON_AUTHORITATIVE_INFORMATION);
        assert_eq!(fallback.as_deref(), Some("mycmd"));
        assert_eq!(body, "fallback");
    }

    assert_eq!(
        state.breakers().get_or_create("mycmd").state(),
        CircuitState::Open
    );
    // Third request never reached the upstream
    mock.assert_async().await;
}

#[tokio::test]
async fn test_breaker_recovers_after_cooldown() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/down")
        .with_status(503)
        .create_async()
        .await;
    let up = server
        .mock("GET", "/up")
        .with_status(200)
        .with_body("recovered")
        .expect(1)
        .create_async()
        .await;

    let (app, state) = create_test_app(&server.url(), breaker_settings(1, 50));

    let (_, fallback, _) = send(&app, "/down", Some("x.circuitbreaker.com")).await;
    assert_eq!(fallback.as_deref(), Some("mycmd"));
    let breaker = state.breakers().get_or_create("mycmd");
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(80)).await;

    let (status, fallback, body) = send(&app, "/up", Some("x.circuitbreaker.com")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fallback, None);
    assert_eq!(body, "recovered");
    assert_eq!(breaker.state(), CircuitState::Closed);
    up.assert_async().await;
}

#[tokio::test]
async fn test_transport_error_protected_vs_unprotected() {
    // Nothing listens on port 1
    let (app, _) = create_test_app("http://127.0.0.1:1", breaker_settings(5, 60_000));

    let (status, _, _) = send(&app, "/get", Some("localhost")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, fallback, body) = send(&app, "/get", Some("www.circuitbreaker.com")).await;
    // `/get` route is declared first, so it still wins over the host route
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(fallback, None);
    assert!(body.contains("error"));

    let (status, fallback, _) = send(&app, "/other", Some("www.circuitbreaker.com")).await;
    assert_eq!(status, StatusCode::NON_AUTHORITATIVE_INFORMATION);
    assert_eq!(fallback.as_deref(), Some("mycmd"));
}

#[tokio::test]
async fn test_custom_route_table() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/houses/h1")
        .match_header("x-source", "gateway")
        .with_status(200)
        .with_body(r#"{"id":"h1"}"#)
        .create_async()
        .await;

    let mut config = GatewayConfig::default();
    config.routes = vec![RouteConfig {
        id: "houses".into(),
        predicate: PredicateConfig::Path("/houses/**".into()),
        filters: vec![FilterConfig::AddRequestHeader {
            name: "X-Source".into(),
            value: "gateway".into(),
        }],
        upstream: Some(server.url()),
    }];
    let app = create_router(Arc::new(GatewayState::from_config(&config).unwrap()));

    let (status, _, body) = send(&app, "/houses/h1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"id":"h1"}"#);
    mock.assert_async().await;

    let (status, _, _) = send(&app, "/get", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Upstream that accepts connections and never answers.
async fn silent_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}

fn breaker_filter() -> FilterConfig {
    FilterConfig::CircuitBreaker {
        name: "mycmd".into(),
        fallback: "/fallback".into(),
    }
}

#[tokio::test]
async fn test_cancelled_half_open_trial_does_not_wedge_breaker() {
    let mut server = mockito::Server::new_async().await;
    let healthy = server
        .mock("GET", "/healthy")
        .with_status(200)
        .with_body("back")
        .expect(1)
        .create_async()
        .await;

    // Two routes guarded by the same breaker
    let mut config = GatewayConfig::default();
    config.defaults.timeout_ms = 100;
    config.breakers = breaker_settings(1, 20);
    config.routes = vec![
        RouteConfig {
            id: "healthy".into(),
            predicate: PredicateConfig::Path("/healthy".into()),
            filters: vec![breaker_filter()],
            upstream: Some(server.url()),
        },
        RouteConfig {
            id: "stuck".into(),
            predicate: PredicateConfig::Path("/stuck".into()),
            filters: vec![breaker_filter()],
            upstream: Some(silent_upstream().await),
        },
    ];
    let state = Arc::new(GatewayState::from_config(&config).unwrap());
    let app = create_router(Arc::clone(&state));
    let breaker = state.breakers().get_or_create("mycmd");

    // Upstream timeout opens the breaker
    let (_, fallback, _) = send(&app, "/stuck", None).await;
    assert_eq!(fallback.as_deref(), Some("mycmd"));
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(40)).await;

    // The half-open trial is abandoned before the upstream answers
    let abandoned =
        tokio::time::timeout(Duration::from_millis(30), send(&app, "/stuck", None)).await;
    assert!(abandoned.is_err());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let (status, fallback, body) = send(&app, "/healthy", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fallback, None);
    assert_eq!(body, "back");
    assert_eq!(breaker.state(), CircuitState::Closed);
    healthy.assert_async().await;
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/get")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let mut config = GatewayConfig::default();
    config.defaults.upstream = server.url();
    config.defaults.max_body_bytes = 16;
    let app = create_router(Arc::new(GatewayState::from_config(&config).unwrap()));

    let post = |body: &'static str| {
        Request::builder()
            .method("POST")
            .uri("/get")
            .body(Body::from(body))
            .unwrap()
    };

    let response = app.clone().oneshot(post("small")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(post("this body is well over sixteen bytes"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    // Only the small request reached the upstream
    mock.assert_async().await;
}
