//! SMTP digest delivery via lettre.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::error::DeliveryError;
use crate::pipeline::types::Notifier;

/// Used when the caller passes an empty plain-text part.
pub const DEFAULT_FALLBACK: &str = "Your daily email digest is attached as HTML.";

const STARTTLS_PORT: u16 = 587;
const SEND_TIMEOUT: Duration = Duration::from_secs(20);

/// Sends the digest as a multipart/alternative email.
///
/// Tries implicit TLS on the configured port first, then STARTTLS on 587.
pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
        address
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::InvalidAddress {
                address: address.to_string(),
                reason: e.to_string(),
            })
    }

    /// Build the outgoing message. Plain text first, then HTML.
    pub fn build_message(
        &self,
        subject: &str,
        html_body: &str,
        text_fallback: &str,
    ) -> Result<Message, DeliveryError> {
        let text = if text_fallback.trim().is_empty() {
            DEFAULT_FALLBACK
        } else {
            text_fallback
        };

        Message::builder()
            .from(Self::mailbox(&self.config.from_address)?)
            .to(Self::mailbox(&self.config.to_address)?)
            .subject(subject)
            .multipart(MultiPart::alternative_plain_html(
                text.to_string(),
                html_body.to_string(),
            ))
            .map_err(|e| DeliveryError::Build(e.to_string()))
    }

    fn credentials(&self) -> Credentials {
        Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        )
    }

    fn send_blocking(&self, message: &Message) -> Result<&'static str, DeliveryError> {
        let host = &self.config.host;
        let send_err = |reason: String| DeliveryError::SendFailed {
            host: host.clone(),
            reason,
        };

        let implicit = SmtpTransport::relay(host)
            .map_err(|e| send_err(format!("SMTP relay error: {e}")))?
            .port(self.config.port)
            .credentials(self.credentials())
            .timeout(Some(SEND_TIMEOUT))
            .build();

        let first = match implicit.send(message) {
            Ok(_) => return Ok("TLS"),
            Err(e) => e,
        };
        warn!(
            host = %host,
            port = self.config.port,
            error = %first,
            "Implicit TLS failed, trying STARTTLS on {STARTTLS_PORT}"
        );

        let starttls = SmtpTransport::starttls_relay(host)
            .map_err(|e| send_err(format!("SMTP relay error: {e}")))?
            .port(STARTTLS_PORT)
            .credentials(self.credentials())
            .timeout(Some(SEND_TIMEOUT))
            .build();

        match starttls.send(message) {
            Ok(_) => Ok("STARTTLS"),
            Err(second) => Err(send_err(format!(
                "failed over both TLS ({first}) and STARTTLS ({second})"
            ))),
        }
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn deliver(
        &self,
        subject: &str,
        html_body: &str,
        text_fallback: &str,
    ) -> Result<(), DeliveryError> {
        let message = self.build_message(subject, html_body, text_fallback)?;
        let notifier = SmtpNotifier::new(self.config.clone());

        let mode = tokio::task::spawn_blocking(move || notifier.send_blocking(&message))
            .await
            .map_err(|e| DeliveryError::SendFailed {
                host: self.config.host.clone(),
                reason: format!("send task aborted: {e}"),
            })??;

        info!(to = %self.config.to_address, via = mode, "Digest emailed");
        Ok(())
    }
}

/// Stand-in used when email delivery is turned off.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn deliver(&self, _subject: &str, _html: &str, _text: &str) -> Result<(), DeliveryError> {
        info!("Email disabled; skipping.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config(to: &str) -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".into(),
            port: 465,
            username: "me@example.com".into(),
            password: SecretString::from("pw"),
            from_address: "me@example.com".into(),
            to_address: to.into(),
        }
    }

    fn formatted(message: &Message) -> String {
        String::from_utf8_lossy(&message.formatted()).into_owned()
    }

    #[test]
    fn builds_multipart_alternative() {
        let notifier = SmtpNotifier::new(config("you@example.com"));
        let message = notifier
            .build_message("Daily Email Digest (last 24h)", "<p>hi</p>", "hi")
            .unwrap();
        let raw = formatted(&message);
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("To: you@example.com"));
        assert!(raw.contains("Subject: Daily Email Digest (last 24h)"));
        assert!(raw.find("text/plain").unwrap() < raw.find("text/html").unwrap());
    }

    #[test]
    fn empty_fallback_gets_default_text() {
        let notifier = SmtpNotifier::new(config("you@example.com"));
        let message = notifier.build_message("s", "<p>x</p>", "  ").unwrap();
        assert!(formatted(&message).contains(DEFAULT_FALLBACK));
    }

    #[test]
    fn invalid_recipient_is_rejected() {
        let notifier = SmtpNotifier::new(config("not an address"));
        let err = notifier.build_message("s", "h", "t").unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn disabled_notifier_is_a_no_op() {
        let notifier = DisabledNotifier;
        assert!(!notifier.is_enabled());
        notifier.deliver("s", "h", "t").await.unwrap();
    }
}
