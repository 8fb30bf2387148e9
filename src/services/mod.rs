/*
 * Responsibility
 * - Standalone utilities used outside the request pipeline
 *   (outbound fetch, startup migrations, logging / error telemetry handles)
 */
pub mod fetcher;
pub mod migrations;
pub mod telemetry;
