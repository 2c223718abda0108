//! Outbound email over an SMTP relay

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::EmailConfig;
use crate::error::{Result, TrackerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// STARTTLS relay with login credentials. Fails if credentials are absent.
    pub fn new(config: &EmailConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(TrackerError::EmailNotConfigured(
                "set VISA_TRACKER_EMAIL and VISA_TRACKER_PASSWORD".to_string(),
            ));
        }

        let address: Address = config.username.parse().map_err(|e| {
            TrackerError::EmailNotConfigured(format!("invalid sender '{}': {}", config.username, e))
        })?;
        let from = Mailbox::new(Some(config.from_name.clone()), address);

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
            .map_err(|e| {
                TrackerError::EmailNotConfigured(format!("SMTP relay '{}': {}", config.smtp_server, e))
            })?
            .port(config.smtp_port)
            .credentials(Credentials::new(config.username.clone(), config.password.clone()))
            .timeout(Some(config.timeout()))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let failed = |reason: String| TrackerError::Notification {
            email: email.to.clone(),
            reason,
        };

        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| failed(format!("bad recipient: {}", e)))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())
            .map_err(|e| failed(format!("message build: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| failed(format!("smtp: {}", e)))?;

        tracing::debug!("Email '{}' sent to {}", email.subject, email.to);
        Ok(())
    }
}
