/*
 * Responsibility
 * - Shared request pipeline steps. Each module exposes `apply(router, ...)` plus the
 *   raw middleware function for custom composition.
 * - Recommended order, outermost first:
 *   request_context → secure_transport → namespace → origin (API routes only)
 */
pub mod namespace;
pub mod origin;
pub mod request_context;
pub mod secure_transport;
