//! Shared HTTP plumbing for the service family: request context, origin gate,
//! HTTPS enforcement, per-request namespaces, health check, outbound fetch,
//! startup migrations and environment config.
pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod services;
pub mod state;

pub use config::{AppEnv, Config, ConfigError, get_from_env};
pub use error::AppError;
pub use middleware::{
    namespace::{Namespace, Scope},
    origin::{JsonBody, OriginGate},
    request_context::{RequestContext, ServerMiddleware},
    secure_transport::SecureTransport,
};
pub use services::fetcher::{ApiGatewayWebFetcher, FetchOptions, InternalWebFetcher, WebFetcher};
pub use services::migrations::{MigrationRunner, startup_migration};
