//! Error telemetry handle.
//!
//! Items at or above the report level are always recorded through `tracing`. When
//! remote reporting is enabled they are also posted to the Rollbar item API,
//! tagged with the service name and environment.

use std::fmt;
use std::panic;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::config::AppEnv;
use crate::services::telemetry::TelemetryError;

pub const ROLLBAR_ITEM_URL: &str = "https://api.rollbar.com/api/1/item/";
pub const ERROR_REPORT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
        }
    }
}

#[derive(Clone)]
pub struct ErrorLog {
    inner: Arc<Inner>,
}

struct Inner {
    service_name: String,
    env: AppEnv,
    report_level: Level,
    remote: Option<RemoteReporter>,
}

struct RemoteReporter {
    client: reqwest::Client,
    endpoint: String,
    access_token: String,
}

impl ErrorLog {
    /// Records items locally only. No remote client is built.
    pub fn disabled(service_name: &str, env: AppEnv) -> Self {
        Self {
            inner: Arc::new(Inner {
                service_name: service_name.to_string(),
                env,
                report_level: Level::Warning,
                remote: None,
            }),
        }
    }

    pub fn remote(service_name: &str, env: AppEnv, access_token: &str) -> Result<Self, TelemetryError> {
        Self::remote_to(service_name, env, access_token, ROLLBAR_ITEM_URL)
    }

    pub fn remote_to(
        service_name: &str,
        env: AppEnv,
        access_token: &str,
        endpoint: &str,
    ) -> Result<Self, TelemetryError> {
        Self::remote_with_timeout(service_name, env, access_token, endpoint, ERROR_REPORT_TIMEOUT)
    }

    /// Each delivery gives up after `timeout`.
    pub fn remote_with_timeout(
        service_name: &str,
        env: AppEnv,
        access_token: &str,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, TelemetryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TelemetryError::Client(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                service_name: service_name.to_string(),
                env,
                report_level: Level::Warning,
                remote: Some(RemoteReporter {
                    client,
                    endpoint: endpoint.to_string(),
                    access_token: access_token.to_string(),
                }),
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.remote.is_some()
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn env(&self) -> AppEnv {
        self.inner.env
    }

    pub fn payload(&self, level: Level, message: &str) -> Value {
        json!({
            "data": {
                "environment": self.inner.env.as_str(),
                "level": level.as_str(),
                "timestamp": chrono::Utc::now().timestamp(),
                "platform": "rust",
                "body": { "message": { "body": message } },
                "custom": { "serviceName": self.inner.service_name },
            }
        })
    }

    /// Record an item. Returns the delivery task when the item is sent remotely.
    ///
    /// Delivery needs a tokio runtime; outside of one the item is only logged.
    pub fn report(&self, level: Level, message: &str) -> Option<JoinHandle<()>> {
        if level < self.inner.report_level {
            return None;
        }

        match level {
            Level::Warning => tracing::warn!(service = %self.inner.service_name, "{}", message),
            _ => tracing::error!(service = %self.inner.service_name, severity = level.as_str(), "{}", message),
        }

        let remote = self.inner.remote.as_ref()?;
        let handle = tokio::runtime::Handle::try_current().ok()?;

        let request = remote
            .client
            .post(&remote.endpoint)
            .header("X-Rollbar-Access-Token", &remote.access_token)
            .json(&self.payload(level, message));

        Some(handle.spawn(async move {
            if let Err(err) = request.send().await.and_then(|res| res.error_for_status()) {
                tracing::warn!(error = %err, "error report delivery failed");
            }
        }))
    }

    pub fn warning(&self, message: &str) -> Option<JoinHandle<()>> {
        self.report(Level::Warning, message)
    }

    pub fn error(&self, message: &str) -> Option<JoinHandle<()>> {
        self.report(Level::Error, message)
    }

    pub fn critical(&self, message: &str) -> Option<JoinHandle<()>> {
        self.report(Level::Critical, message)
    }
}

impl fmt::Debug for ErrorLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorLog")
            .field("service_name", &self.inner.service_name)
            .field("env", &self.inner.env)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Report panics, including panics inside spawned tasks, as critical items.
///
/// The previous hook still runs afterwards.
pub fn install_panic_hook(error_log: ErrorLog) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        error_log.critical(&format!("uncaught panic: {}", info));
        default_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_log_never_sends() {
        let log = ErrorLog::disabled("identity", AppEnv::Local);
        assert!(!log.is_enabled());
        assert!(log.error("boom").is_none());
    }

    #[test]
    fn payload_is_tagged_with_service_and_env() {
        let log = ErrorLog::disabled("identity", AppEnv::Production);
        let payload = log.payload(Level::Error, "boom");

        assert_eq!(payload["data"]["environment"], "production");
        assert_eq!(payload["data"]["level"], "error");
        assert_eq!(payload["data"]["custom"]["serviceName"], "identity");
        assert_eq!(payload["data"]["body"]["message"]["body"], "boom");
    }

    #[tokio::test]
    async fn below_report_level_is_ignored() {
        let log = ErrorLog::remote_to("identity", AppEnv::Staging, "t", "http://127.0.0.1:9/").unwrap();
        assert!(log.is_enabled());
        assert!(log.report(Level::Info, "chatter").is_none());
    }
}
