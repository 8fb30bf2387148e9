//! Request context population.
//!
//! Should be the outermost middleware. Every request gets a [`RequestContext`]
//! in its extensions (receipt time, request id, logger, error telemetry) before
//! anything else runs, and the rest of the pipeline runs with the service logger as
//! the default `tracing` subscriber.
//!
//! Layers (outermost first):
//! - Request-Id generation + propagation (X-Request-Id)
//! - Context population
//! - Request-entry logging (method, path, status, latency) via `TraceLayer`
//!
//! Modes:
//! - Local: JSON logs on stdout (or nothing when disabled), error telemetry kept local.
//! - Full: stdout plus remote log shipping, error telemetry reported remotely.

use axum::{
    Router,
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderName, Request, request::Parts},
    middleware::{self, Next},
    response::Response,
};
use chrono::{DateTime, Utc};
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Instrument;
use tracing::instrument::WithSubscriber;
use uuid::Uuid;

use crate::config::{AppEnv, Config};
use crate::error::AppError;
use crate::services::telemetry::{
    ErrorLog, LogShipper, ServiceLogger, ShippingConfig, TelemetryError, install_panic_hook,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request values every handler can rely on.
#[derive(Clone, Debug)]
pub struct RequestContext {
    /// When the request was received (UTC).
    pub request_time: DateTime<Utc>,
    pub request_id: String,
    pub log: ServiceLogger,
    pub error_log: ErrorLog,
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or(AppError::MissingContext)
    }
}

/// Logger and error telemetry shared by every request of one service.
#[derive(Clone, Debug)]
pub struct ServerMiddleware {
    logger: ServiceLogger,
    error_log: ErrorLog,
}

impl ServerMiddleware {
    /// For local and test runs. Never talks to a remote service.
    ///
    /// Does not install the panic hook; call [`Self::capture_uncaught`] once at
    /// startup (`app::run` does).
    pub fn local(service_name: &str, env: AppEnv, disable_logging: bool) -> Self {
        let logger = if disable_logging {
            ServiceLogger::discard(service_name, env)
        } else {
            ServiceLogger::stdout(service_name, env)
        };

        Self {
            logger,
            error_log: ErrorLog::disabled(service_name, env),
        }
    }

    /// For staging and production. Must be called inside a tokio runtime, since
    /// log shipping runs as a background task.
    ///
    /// Does not install the panic hook; call [`Self::capture_uncaught`] once at
    /// startup (`app::run` does).
    pub fn full(
        service_name: &str,
        env: AppEnv,
        loggly_token: &str,
        loggly_subdomain: &str,
        rollbar_token: &str,
    ) -> Result<Self, TelemetryError> {
        let shipper = LogShipper::spawn(ShippingConfig::loggly(loggly_token, loggly_subdomain))?;

        Ok(Self {
            logger: ServiceLogger::shipping(service_name, env, shipper),
            error_log: ErrorLog::remote(service_name, env, rollbar_token)?,
        })
    }

    pub fn from_parts(logger: ServiceLogger, error_log: ErrorLog) -> Self {
        Self { logger, error_log }
    }

    pub fn from_config(config: &Config) -> Result<Self, TelemetryError> {
        match &config.remote_telemetry {
            Some(remote) => Self::full(
                &config.service_name,
                config.app_env,
                &remote.loggly_token,
                &remote.loggly_subdomain,
                &remote.rollbar_token,
            ),
            None => Ok(Self::local(
                &config.service_name,
                config.app_env,
                config.logging_disabled,
            )),
        }
    }

    pub fn logger(&self) -> &ServiceLogger {
        &self.logger
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    /// Route process-level panics, including panics in spawned tasks, to this
    /// service's error telemetry. The hook is process-wide; install it once.
    pub fn capture_uncaught(&self) {
        install_panic_hook(self.error_log.clone());
    }
}

pub fn apply<S>(router: Router<S>, server: ServerMiddleware) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let trace = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(tracing::Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);
    let layers = ServiceBuilder::new()
        // Generate a request id if missing, then propagate it to the response.
        .layer(SetRequestIdLayer::new(
            request_id_header.clone(),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header))
        .layer(middleware::from_fn_with_state(server, populate_request_context))
        .layer(trace);

    router.layer(layers)
}

pub async fn populate_request_context(
    State(server): State<ServerMiddleware>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let request_time = Utc::now();

    // Set by SetRequestIdLayer; only a non-UTF-8 client value falls through.
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestContext {
        request_time,
        request_id: request_id.clone(),
        log: server.logger.clone(),
        error_log: server.error_log.clone(),
    });

    let span = server.logger.request_span(&request_id);
    next.run(req)
        .instrument(span)
        .with_subscriber(server.logger.dispatch().clone())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use tower::ServiceExt;

    async fn context_summary(ctx: RequestContext) -> String {
        format!(
            "{}|{}|{}|{}",
            ctx.request_time.timestamp_millis(),
            ctx.log.service_name(),
            ctx.error_log.service_name(),
            ctx.request_id
        )
    }

    async fn call(server: ServerMiddleware, req: Request<Body>) -> Response {
        let app = apply(Router::new().route("/", get(context_summary)), server);
        app.oneshot(req).await.expect("response")
    }

    async fn body_string(res: Response) -> String {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn local_mode_populates_context() {
        let server = ServerMiddleware::local("hoot", AppEnv::Local, true);
        let before = Utc::now().timestamp_millis();

        let res = call(server, Request::builder().uri("/").body(Body::empty()).unwrap()).await;
        assert_eq!(res.status(), 200);
        let res_id = res.headers()[REQUEST_ID_HEADER].to_str().ok().map(str::to_string);

        let body = body_string(res).await;
        let mut parts = body.split('|');
        let stamped: i64 = parts.next().unwrap().parse().unwrap();
        assert!(stamped >= before);
        assert!(stamped - before <= 10);
        assert_eq!(parts.next(), Some("hoot"));
        assert_eq!(parts.next(), Some("hoot"));
        assert_eq!(Some(parts.next().unwrap()), res_id.as_deref());
    }

    #[tokio::test]
    async fn full_mode_populates_context() {
        let server = ServerMiddleware::full("hoot", AppEnv::Production, "BAD", "BAD", "BAD").unwrap();
        assert!(server.error_log().is_enabled());
        assert!(server.logger().is_enabled());
        let before = Utc::now().timestamp_millis();

        let res = call(server, Request::builder().uri("/").body(Body::empty()).unwrap()).await;
        let body = body_string(res).await;
        let stamped: i64 = body.split('|').next().unwrap().parse().unwrap();
        assert!(stamped >= before);
        assert!(stamped - before <= 10);
    }

    #[tokio::test]
    async fn local_mode_never_reports_remotely() {
        let server = ServerMiddleware::local("hoot", AppEnv::Test, false);
        assert!(!server.error_log().is_enabled());
        assert!(server.logger().is_enabled());
    }

    #[tokio::test]
    async fn client_request_id_is_kept() {
        let server = ServerMiddleware::local("hoot", AppEnv::Test, true);
        let res = call(
            server,
            Request::builder()
                .uri("/")
                .header(REQUEST_ID_HEADER, "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(res.headers()[REQUEST_ID_HEADER], "req-42");
        assert!(body_string(res).await.ends_with("|req-42"));
    }

    #[tokio::test]
    async fn extractor_rejects_without_middleware() {
        let app = Router::new().route("/", get(context_summary));
        let res = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), 500);
    }
}
