//! # Auth Services
//!
//! This crate provides authentication services for the application.
//! It verifies provider access tokens (Google, Facebook), caches the resulting identity
//! with a sliding expiration, and exposes an actix middleware that resolves the caller
//! on every request.

/// Injectable wall clock.
pub mod clock;
/// Middleware for request authentication and user context propagation.
pub mod middleware;
/// Identity provider adapters.
pub mod providers;
/// Session cache: token to identity resolution.
pub mod service;
/// Identity record persistence.
pub mod store;
/// Types and structures used in authentication services.
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use service::{SessionCache, SessionTtls};
pub use types::*;
