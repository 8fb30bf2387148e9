/*
 * Responsibility
 * - Config loading → dependency construction → Router assembly
 * - Applying the shared middleware in the right order
 * - Startup migrations, then axum::serve()
 */
use anyhow::Result;
use axum::Router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::config::Config;
use crate::middleware::{
    namespace::{self, Namespace},
    origin::{self, OriginGate},
    request_context::{self, ServerMiddleware},
    secure_transport::{self, SecureTransport},
};
use crate::services::migrations::MigrationRunner;
use crate::state::AppState;

fn init_tracing() {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,service_common=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok();
}

/// Load config from the environment and serve `service_routes` behind the shared
/// middleware.
pub async fn run(service_routes: Router<AppState>) -> Result<()> {
    init_tracing();
    let config = Config::from_env()?;

    tracing::info!(
        "starting {} in {} mode on {}",
        config.service_name,
        config.app_env,
        config.addr
    );

    if config.run_migrations {
        let runner = MigrationRunner::new(&config.migration_tool);
        tokio::task::spawn_blocking(move || runner.run()).await??;
    }

    let server = ServerMiddleware::from_config(&config)?;
    server.capture_uncaught();

    let state = AppState::from_config(&config)?;
    let namespace = Namespace::new(&config.service_name);
    let app = build_router(service_routes, state, &config, server, namespace);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Health check plus `service_routes`, wrapped (outermost first) in request
/// context population, HTTPS enforcement and namespace binding. Only
/// `service_routes` go through the origin gate.
pub fn build_router(
    service_routes: Router<AppState>,
    state: AppState,
    config: &Config,
    server: ServerMiddleware,
    namespace: Namespace,
) -> Router {
    let gate = OriginGate::new(&config.allowed_origins).with_json_body(config.parse_json_body);
    let service_routes = origin::apply(service_routes, gate);

    let router = Router::new()
        .merge(api::health::routes())
        .merge(service_routes);
    let router = namespace::apply(router, namespace);
    let router = secure_transport::apply(
        router,
        SecureTransport::new(config.app_env, &config.https_exception_paths),
    );
    let router = request_context::apply(router, server);

    router.with_state(state)
}
