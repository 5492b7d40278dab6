//! # Web Handlers for the Delivery Watch Web Application
//!
//! This crate provides the web handlers for the delivery watch application.

/// Health and operator handlers
mod admin_handlers;
pub use admin_handlers::*;

/// Handlers for subscription API endpoints
mod subscription_handlers;
pub use subscription_handlers::*;
