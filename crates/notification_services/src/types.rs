/// Errors raised while delivering a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Simple email service (SES) errors.
    #[error("AWS SES error: {0}")]
    SesError(String),

    /// The mail backend did not answer in time.
    #[error("Mail delivery timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Invalid email format.
    #[error("Invalid email format: {0}")]
    InvalidEmail(String),
}

/// A fully composed e-mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// HTML body
    pub html_body: String,
}
