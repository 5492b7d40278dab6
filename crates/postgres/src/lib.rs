//! # Postgres
//!
//! Connection pooling, schema migrations and the shared store error type used by the
//! identity and subscription stores of the delivery watch service.

/// Database client for the delivery watch service.
pub mod database;
/// Error type shared by every store implementation.
pub mod error;

pub use error::StoreError;
