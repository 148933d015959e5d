//! Outbound mail collaborator.
//!
//! Delivery is synchronous from the workflow's point of view: the caller
//! waits for the result and runs its compensating rollback when delivery
//! fails. The default sender for local development logs instead of
//! sending; `HttpMailer` posts to a JSON mail API.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::info;
use url::Url;

#[derive(Clone, Debug)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mail delivery abstraction consumed by the workflows.
#[async_trait]
pub trait MailSender: Send + Sync {
    /// Deliver a message or return an error so the caller can compensate.
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

/// Local dev sender that logs the message and reports success.
#[derive(Clone, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            "mail send stub"
        );
        Ok(())
    }
}

/// Sender backed by a JSON mail-delivery API.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: Url,
    api_key: SecretString,
    from: String,
}

impl HttpMailer {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: Url, api_key: SecretString, from: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::sigilo::APP_USER_AGENT)
            .build()
            .context("failed to build mail client")?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl MailSender for HttpMailer {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let payload = json!({
            "from": self.from,
            "to": message.to,
            "subject": message.subject,
            "text": message.body,
        });

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .context("mail delivery request failed")?;

        if !response.status().is_success() {
            bail!("mail delivery rejected: {}", response.status());
        }

        Ok(())
    }
}

pub const ACCOUNT_SUBJECT: &str = "Your account credentials";
pub const CHALLENGE_SUBJECT: &str = "Your verification code";

/// Body of the registration confirmation mail.
#[must_use]
pub fn account_created_body(uid: &str, email: &str) -> String {
    let confirm = "This is the confirmation that your account has been successfully created.\n\n";
    let base = "This email includes your account details, so please keep it safe!\n\n";
    let uid_line = format!("\n1. Unique User Id: {uid}");
    let email_line = format!("\n\n2. Registered Email Id: {email}");
    let usage = "\n\n\nRemember you will always be required to use email & password along with your unique user id mentioned above during login.";
    let disclaimer = "\n\n\n*This is an automated mail. Please do not reply to this message as this inbox is not monitored.";
    format!("{confirm}{base}{uid_line}{email_line}{usage}{disclaimer}")
}

/// Body of the one-time verification code mail.
#[must_use]
pub fn challenge_body(code: &str, reason_text: &str) -> String {
    let confirm = format!("Let's complete your {reason_text}.\n\n");
    let base = "Here is your eight-digit verification code. This code is valid only for a few minutes!\n\n";
    let code_line = format!("\nVerification Code: {code}");
    let usage = "\n\n\nPlease enter this verification code in the client app to complete the ongoing verification process.";
    let disclaimer = "\n\n\n*This is an automated mail. Please do not reply to this message as this inbox is not monitored.";
    format!("{confirm}{base}{code_line}{usage}{disclaimer}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let mailer = LogMailer;
        let message = MailMessage {
            to: "a@example.com".to_string(),
            subject: ACCOUNT_SUBJECT.to_string(),
            body: account_created_body("uid-1", "a@example.com"),
        };
        assert!(mailer.send(&message).await.is_ok());
    }

    #[test]
    fn bodies_carry_the_essentials() {
        let body = account_created_body("uid-1", "a@example.com");
        assert!(body.contains("uid-1"));
        assert!(body.contains("a@example.com"));

        let body = challenge_body("12345678", "account password reset");
        assert!(body.contains("12345678"));
        assert!(body.contains("password reset"));
    }
}
