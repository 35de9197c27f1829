//! Outbound mail — SMTP via lettre.

use async_trait::async_trait;
use lettre::message::MultiPart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};

use crate::error::MailError;

/// One message ready for delivery. `from` may be empty; the transport falls
/// back to its configured sender address.
#[derive(Debug, Clone)]
pub struct OutboundMail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Opaque delivery capability. Success returns a message id; failure is
/// distinguishable so the worker can account for lost sends.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutboundMail) -> Result<String, MailError>;
}

/// SMTP transport configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_SMTP_HOST` is not set (mailer disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("EMAIL_SMTP_HOST").ok()?;

        let port: u16 = std::env::var("EMAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}

/// Mailer over a relay SMTP transport with multipart text+html bodies.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from_address: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| MailError::Transport(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutboundMail) -> Result<String, MailError> {
        let from = if mail.from.is_empty() {
            &self.from_address
        } else {
            &mail.from
        };

        let message_id = generate_message_id(from);
        let message = Message::builder()
            .from(from.parse().map_err(|e| MailError::InvalidAddress {
                address: from.to_string(),
                reason: format!("{e}"),
            })?)
            .to(mail.to.parse().map_err(|e| MailError::InvalidAddress {
                address: mail.to.clone(),
                reason: format!("{e}"),
            })?)
            .subject(&mail.subject)
            .message_id(Some(message_id.clone()))
            .multipart(MultiPart::alternative_plain_html(
                mail.text.clone(),
                mail.html.clone(),
            ))
            .map_err(|e| MailError::Build(e.to_string()))?;

        // SmtpTransport is blocking; keep it off the async executor.
        let transport = self.transport.clone();
        let outcome = tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::Transport(format!("send task failed: {e}")))?;

        match outcome {
            Ok(_) => {
                tracing::info!(to = %mail.to, "Email sent");
                Ok(message_id)
            }
            Err(e) => Err(MailError::Rejected(e.to_string())),
        }
    }
}

/// RFC 5322 style message id: `<unique@domain>`.
fn generate_message_id(from: &str) -> String {
    let domain = from.rsplit('@').next().filter(|d| !d.is_empty()).unwrap_or("localhost");
    let nonce: u64 = rand::thread_rng().r#gen();
    format!(
        "<{}.{:016x}@{}>",
        chrono::Utc::now().timestamp_millis(),
        nonce,
        domain
    )
}
