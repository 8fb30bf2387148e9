//! Full middleware stack as assembled by `app::build_router`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::State,
    http::{Request, StatusCode, header},
    routing::{get, post},
};
use service_common::{
    Config, JsonBody, Namespace, RequestContext, Scope, ServerMiddleware, app::build_router,
    services::fetcher::InternalWebFetcher,
    services::telemetry::{ErrorLog, LogShipper, ServiceLogger},
    state::AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;

fn config(pairs: &[(&'static str, &'static str)]) -> Config {
    let env: HashMap<&str, &str> = pairs.iter().copied().collect();
    Config::from_source(&env).expect("config")
}

fn local_config() -> Config {
    config(&[("SERVICE_NAME", "hoot"), ("APP_ENV", "test"), ("ORIGINS", "a.com")])
}

fn server_config() -> Config {
    config(&[
        ("SERVICE_NAME", "hoot"),
        ("APP_ENV", "production"),
        ("ORIGINS", "a.com"),
        ("LOGGLY_TOKEN", "x"),
        ("LOGGLY_SUBDOMAIN", "x"),
        ("ROLLBAR_TOKEN", "x"),
    ])
}

async fn whoami(ctx: RequestContext, scope: Scope) -> String {
    format!("{}:{}", ctx.log.service_name(), scope.namespace())
}

async fn echo(body: JsonBody) -> String {
    body.0["name"].as_str().unwrap_or_default().to_string()
}

async fn has_fetcher(State(state): State<AppState>) -> &'static str {
    if Arc::strong_count(&state.web_fetcher) > 0 { "yes" } else { "no" }
}

fn app(config: &Config) -> Router {
    let routes = Router::new()
        .route("/whoami", get(whoami))
        .route("/echo", post(echo))
        .route("/fetcher", get(has_fetcher));
    let state = AppState::new(Arc::new(InternalWebFetcher::new().expect("fetcher")));

    build_router(
        routes,
        state,
        config,
        ServerMiddleware::local(&config.service_name, config.app_env, true),
        Namespace::new("hoot-ns"),
    )
}

async fn body_string(res: axum::response::Response) -> String {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

#[tokio::test]
async fn health_check_skips_origin_gate() {
    let res = app(&local_config())
        .oneshot(Request::builder().uri("/check").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_string(res).await, "Everything looks A-OK");
}

#[tokio::test]
async fn health_check_is_exempt_from_https_on_server() {
    let res = app(&server_config())
        .oneshot(Request::builder().uri("/check").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert!(!res.headers().contains_key(header::STRICT_TRANSPORT_SECURITY));
}

#[tokio::test]
async fn service_routes_see_context_and_namespace() {
    let res = app(&local_config())
        .oneshot(
            Request::builder()
                .uri("/whoami")
                .header(header::ORIGIN, "a.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("application/json"));
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(body_string(res).await, "hoot:hoot-ns");
}

#[tokio::test]
async fn service_routes_reject_unknown_origin() {
    let res = app(&local_config())
        .oneshot(
            Request::builder()
                .uri("/whoami")
                .header(header::ORIGIN, "b.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(res).await.is_empty());
}

#[tokio::test]
async fn json_body_reaches_handler() {
    let res = app(&local_config())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/echo")
                .header(header::ORIGIN, "a.com")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name":"hoot"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_string(res).await, "hoot");
}

#[tokio::test]
async fn server_env_requires_https_for_service_routes() {
    let res = app(&server_config())
        .oneshot(
            Request::builder()
                .uri("/whoami")
                .header(header::HOST, "hoot.example")
                .header(header::ORIGIN, "a.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);

    let res = app(&server_config())
        .oneshot(
            Request::builder()
                .uri("/whoami")
                .header("x-forwarded-proto", "https")
                .header(header::ORIGIN, "a.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers()[header::STRICT_TRANSPORT_SECURITY],
        "max-age=43200; includeSubdomains"
    );
}

#[tokio::test]
async fn state_is_available_to_service_routes() {
    let res = app(&local_config())
        .oneshot(
            Request::builder()
                .uri("/fetcher")
                .header(header::ORIGIN, "a.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(body_string(res).await, "yes");
}

#[tokio::test]
async fn rejected_origin_is_logged_and_never_reaches_handler() {
    let config = local_config();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let routes = Router::new().route(
        "/whoami",
        get(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            "reached"
        }),
    );

    let (tx, mut rx) = mpsc::channel(64);
    let server = ServerMiddleware::from_parts(
        ServiceLogger::shipping("hoot", config.app_env, LogShipper::from_sender(tx)),
        ErrorLog::disabled("hoot", config.app_env),
    );
    let app = build_router(
        routes,
        AppState::new(Arc::new(InternalWebFetcher::new().expect("fetcher"))),
        &config,
        server,
        Namespace::new("hoot-ns"),
    );

    let res = app
        .oneshot(
            Request::builder()
                .uri("/whoami")
                .header(header::ORIGIN, "b.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let mut warnings = Vec::new();
    while let Ok(line) = rx.try_recv() {
        let entry: serde_json::Value = serde_json::from_str(&line).expect("json line");
        if entry["level"] == "WARN" {
            warnings.push(entry);
        }
    }
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["fields"]["message"], "Origin is not allowed");
    assert_eq!(warnings[0]["fields"]["origin"], "b.com");
}
