/*
 * Responsibility
 * - tokio runtime startup
 * - app::run() with the bare health-check service (no logic here)
 */
use anyhow::Result;
use axum::Router;

#[tokio::main]
async fn main() -> Result<()> {
    service_common::app::run(Router::new()).await
}
