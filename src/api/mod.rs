/*
 * Responsibility
 * - Routes shared by every service
 */
pub mod health;
