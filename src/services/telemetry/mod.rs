//! Logging and error telemetry handles attached to every request.
pub mod error_log;
pub mod logger;
pub mod shipping;

use thiserror::Error;

pub use error_log::{ErrorLog, Level, install_panic_hook};
pub use logger::ServiceLogger;
pub use shipping::{LogShipper, ShippingConfig};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("log shipping needs a running tokio runtime")]
    NoRuntime,
    #[error("telemetry client error: {0}")]
    Client(String),
}
