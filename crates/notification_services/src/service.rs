use std::sync::Mutex;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ses::Client as SesClient;
use aws_sdk_ses::types::{Body, Content, Destination, Message};
use uuid::Uuid;

use crate::types::{NotificationError, OutgoingMail};

/// Anything able to deliver an HTML e-mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends the mail and returns the backend's message id.
    async fn send_html(&self, mail: &OutgoingMail) -> Result<String, NotificationError>;
}

/// Mailer backed by AWS SES.
#[derive(Debug, Clone)]
pub struct SesMailer {
    ses_client: SesClient,
    from_email: String,
}

impl SesMailer {
    /// Creates a new SES mailer using the default AWS credential chain.
    pub async fn new(from_email: impl Into<String>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        Self {
            ses_client: SesClient::new(&config),
            from_email: from_email.into(),
        }
    }
}

fn ses_content(data: &str, part: &str) -> Result<Content, NotificationError> {
    Content::builder().data(data).build().map_err(|e| {
        log::error!("❌ Failed to build {} content: {}", part, e);
        NotificationError::SesError(format!("Failed to build {}: {}", part, e))
    })
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send_html(&self, mail: &OutgoingMail) -> Result<String, NotificationError> {
        if !mail.to.contains('@') {
            return Err(NotificationError::InvalidEmail(mail.to.clone()));
        }

        let body = Body::builder()
            .html(ses_content(&mail.html_body, "HTML body")?)
            .text(ses_content(&mail.subject, "text body")?)
            .build();

        let message = Message::builder()
            .subject(ses_content(&mail.subject, "subject")?)
            .body(body)
            .build();

        let destination = Destination::builder().to_addresses(&mail.to).build();

        log::debug!("📧 Sending email to {} via AWS SES", mail.to);

        let result = self
            .ses_client
            .send_email()
            .source(&self.from_email)
            .destination(destination)
            .message(message)
            .send()
            .await;

        match result {
            Ok(output) => {
                let message_id = output.message_id().to_string();
                log::info!("✅ Email sent to {} (SES id {})", mail.to, message_id);
                Ok(message_id)
            }
            Err(e) => {
                log::error!("❌ AWS SES error: {:#?}", e);
                let error_msg = if let Some(service_error) = e.as_service_error() {
                    format!("AWS SES service error: {:?}", service_error)
                } else {
                    format!("AWS SES error: {}", e)
                };
                Err(NotificationError::SesError(error_msg))
            }
        }
    }
}

/// Mailer for local development: writes every mail to the log.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_html(&self, mail: &OutgoingMail) -> Result<String, NotificationError> {
        log::info!("📧 [MOCK EMAIL] To: {}", mail.to);
        log::info!("📧 [MOCK EMAIL] Subject: {}", mail.subject);
        log::info!("📧 [MOCK EMAIL] Body:\n{}", mail.html_body);

        Ok(format!("mock-email-{}", Uuid::new_v4()))
    }
}

/// Mailer that keeps every mail in memory. Used by tests across the workspace.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
    failing: bool,
}

impl RecordingMailer {
    /// A mailer that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer that records the attempt and then fails it.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    /// Every mail handed to this mailer so far, in order.
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_html(&self, mail: &OutgoingMail) -> Result<String, NotificationError> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(mail.clone());

        if self.failing {
            return Err(NotificationError::SesError("recording mailer set to fail".into()));
        }
        Ok(format!("recorded-{}", Uuid::new_v4()))
    }
}
