//! HTTP route handlers.

pub mod admin;
pub mod auth;
pub mod health;
pub mod metrics;
pub mod reservations;
pub mod vouchers;
pub mod webhooks;
