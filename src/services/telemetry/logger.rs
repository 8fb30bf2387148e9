//! Per-service structured logger.
//!
//! A `ServiceLogger` owns its own `tracing::Dispatch`, independent of the
//! process-level subscriber, so each service sink (stdout, discarded, stdout plus
//! remote shipping) can be chosen at middleware construction time. Only `info` and
//! above are recorded. Request events are emitted inside a span carrying the
//! service name, environment and request id.

use std::fmt;
use std::sync::Arc;

use tracing::Dispatch;
use tracing::subscriber::NoSubscriber;
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, registry::Registry};

use crate::config::AppEnv;
use crate::services::telemetry::shipping::LogShipper;

#[derive(Clone)]
pub struct ServiceLogger {
    inner: Arc<Inner>,
}

struct Inner {
    dispatch: Dispatch,
    service_name: String,
    env: AppEnv,
    enabled: bool,
}

impl ServiceLogger {
    /// JSON lines on stdout.
    pub fn stdout(service_name: &str, env: AppEnv) -> Self {
        let subscriber = Registry::default().with(LevelFilter::INFO).with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(std::io::stdout),
        );

        Self::from_dispatch(Dispatch::new(subscriber), service_name, env, true)
    }

    /// Every event is dropped.
    pub fn discard(service_name: &str, env: AppEnv) -> Self {
        Self::from_dispatch(
            Dispatch::new(NoSubscriber::default()),
            service_name,
            env,
            false,
        )
    }

    /// JSON lines on stdout, and the same lines handed to `shipper`.
    pub fn shipping(service_name: &str, env: AppEnv, shipper: LogShipper) -> Self {
        let subscriber = Registry::default()
            .with(LevelFilter::INFO)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stdout),
            )
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(shipper),
            );

        Self::from_dispatch(Dispatch::new(subscriber), service_name, env, true)
    }

    pub fn from_dispatch(dispatch: Dispatch, service_name: &str, env: AppEnv, enabled: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatch,
                service_name: service_name.to_string(),
                env,
                enabled,
            }),
        }
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.inner.dispatch
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn env(&self) -> AppEnv {
        self.inner.env
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Root span for one request, created on this logger's dispatch.
    pub fn request_span(&self, request_id: &str) -> tracing::Span {
        tracing::dispatcher::with_default(&self.inner.dispatch, || {
            tracing::info_span!(
                parent: None,
                "request",
                service = %self.inner.service_name,
                env = %self.inner.env,
                request_id = %request_id,
            )
        })
    }

    /// Run `f` with this logger as the default subscriber.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.inner.dispatch, f)
    }

    pub fn info(&self, message: &str) {
        self.in_scope(|| tracing::info!(service = %self.inner.service_name, "{}", message));
    }

    pub fn warn(&self, message: &str) {
        self.in_scope(|| tracing::warn!(service = %self.inner.service_name, "{}", message));
    }

    pub fn error(&self, message: &str) {
        self.in_scope(|| tracing::error!(service = %self.inner.service_name, "{}", message));
    }
}

impl fmt::Debug for ServiceLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceLogger")
            .field("service_name", &self.inner.service_name)
            .field("env", &self.inner.env)
            .field("enabled", &self.inner.enabled)
            .finish()
    }
}
