//! # Notification Services
//!
//! This crate delivers the e-mails of the delivery watch service.
//! It includes the `Mailer` abstraction with an AWS SES backend, a logging backend for
//! development, and the `NotificationDispatcher` that words every message.

/// Message composition and time-bounded dispatch.
pub mod dispatcher;
/// Mailer backends.
pub mod service;
/// Types and errors used by the notification services.
pub mod types;

pub use dispatcher::NotificationDispatcher;
pub use service::{LogMailer, Mailer, RecordingMailer, SesMailer};
pub use types::{NotificationError, OutgoingMail};
