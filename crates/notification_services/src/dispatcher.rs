use std::sync::Arc;
use std::time::Duration;

use crate::service::Mailer;
use crate::types::{NotificationError, OutgoingMail};

/// Words and sends every mail the service produces.
///
/// Each send is bounded by `send_timeout`, so a stalled mail backend cannot hold up the
/// caller. Delivery is never confirmed beyond the backend accepting the message.
#[derive(Clone)]
pub struct NotificationDispatcher {
    mailer: Arc<dyn Mailer>,
    operator_email: String,
    send_timeout: Duration,
}

impl NotificationDispatcher {
    /// Creates a dispatcher sending through `mailer`, copying the operator on alerts.
    pub fn new(mailer: Arc<dyn Mailer>, operator_email: impl Into<String>) -> Self {
        Self {
            mailer,
            operator_email: operator_email.into(),
            send_timeout: Duration::from_secs(15),
        }
    }

    /// Overrides the per-mail timeout (default 15 seconds).
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// The configured operator address.
    pub fn operator_email(&self) -> &str {
        &self.operator_email
    }

    /// Tells the subscriber the restaurant opened, then tells the operator who was told.
    ///
    /// Both mails are attempted even if the first one fails; the first error is returned.
    pub async fn restaurant_opened(
        &self,
        subscriber_email: &str,
        restaurant_name: &str,
    ) -> Result<(), NotificationError> {
        let subject = format!("Restaurant {} is now open for deliveries", restaurant_name);

        let subscriber_mail = OutgoingMail {
            to: subscriber_email.to_string(),
            subject: subject.clone(),
            html_body: format!(
                "<div><div><b>Restaurant {} is now open for deliveries</b><br/></div>\
                 <div>you have automatically been unsubscribed from this restaurant.</div></div>",
                restaurant_name
            ),
        };
        let operator_mail = OutgoingMail {
            to: self.operator_email.clone(),
            subject,
            html_body: format!(
                "<div>the user who asked for this was: <b>{}</b></div>",
                subscriber_email
            ),
        };

        let subscriber_result = self.send(&subscriber_mail).await;
        let operator_result = self.send(&operator_mail).await;
        subscriber_result.and(operator_result)
    }

    /// Tells the operator that someone signed in for the first time.
    pub async fn new_user(
        &self,
        first_name: &str,
        family_name: &str,
        email: &str,
    ) -> Result<(), NotificationError> {
        let text = format!(
            "new user: {} {} ({}), has logged in",
            first_name, family_name, email
        );
        let mail = OutgoingMail {
            to: self.operator_email.clone(),
            subject: text.clone(),
            html_body: format!("<div>{}</div>", text),
        };
        self.send(&mail).await
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotificationError> {
        match tokio::time::timeout(self.send_timeout, self.mailer.send_html(mail)).await {
            Ok(Ok(message_id)) => {
                log::debug!("📧 Mail '{}' to {} accepted: {}", mail.subject, mail.to, message_id);
                Ok(())
            }
            Ok(Err(e)) => {
                log::warn!("Failed to send mail to {}: {}", mail.to, e);
                Err(e)
            }
            Err(_) => {
                log::warn!("Mail to {} timed out after {:?}", mail.to, self.send_timeout);
                Err(NotificationError::Timeout(self.send_timeout))
            }
        }
    }
}
