use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, SmtpSettings, WhatsAppSettings};
use crate::contact_extractor::to_whatsapp_e164;
use crate::errors::AppError;

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait WhatsAppTransport: Send + Sync {
    /// `to` is normalized to E.164-like form before submission.
    async fn send_whatsapp(&self, to: &str, body: &str) -> Result<(), AppError>;
}

/// Channel transports available to a dispatch. `None` means the channel has no
/// credentials and every message on it fails with a configuration error.
#[derive(Clone, Default)]
pub struct Transports {
    pub email: Option<Arc<dyn EmailTransport>>,
    pub whatsapp: Option<Arc<dyn WhatsAppTransport>>,
}

impl Transports {
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let email = match &config.smtp {
            Some(smtp) => Some(Arc::new(SmtpEmailTransport::new(smtp, config.http_timeout())?)
                as Arc<dyn EmailTransport>),
            None => None,
        };
        let whatsapp = match &config.whatsapp {
            Some(settings) => Some(Arc::new(GraphWhatsAppTransport::new(
                settings,
                config.http_timeout(),
            )?) as Arc<dyn WhatsAppTransport>),
            None => None,
        };
        Ok(Self { email, whatsapp })
    }
}

/// SMTP (STARTTLS) sender.
#[derive(Clone)]
pub struct SmtpEmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailTransport {
    pub fn new(settings: &SmtpSettings, timeout: Duration) -> Result<Self, AppError> {
        let from: Mailbox = settings.from.parse().map_err(|e| {
            AppError::Configuration(format!("Invalid sender email '{}': {}", settings.from, e))
        })?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| {
                AppError::Configuration(format!(
                    "Failed to initialize SMTP relay '{}': {}",
                    settings.host, e
                ))
            })?
            .port(settings.port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .timeout(Some(timeout))
            .build();

        Ok(Self { mailer, from })
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        // A malformed recipient can never succeed, so it is not transient.
        let to: Mailbox = to
            .parse()
            .map_err(|e| AppError::BadRequest(format!("Invalid recipient email '{}': {}", to, e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| AppError::InternalError(format!("Failed to build email message: {}", e)))?;

        self.mailer.send(message).await.map_err(|e| {
            if e.is_permanent() {
                AppError::ExternalApiError(format!("SMTP rejected message: {}", e))
            } else if e.is_timeout() {
                AppError::Timeout(format!("SMTP send timed out: {}", e))
            } else {
                AppError::Transient(format!("SMTP send failed: {}", e))
            }
        })?;

        Ok(())
    }
}

/// WhatsApp Business Cloud API sender.
#[derive(Clone)]
pub struct GraphWhatsAppTransport {
    client: reqwest::Client,
    base_url: String,
    phone_number_id: String,
    access_token: String,
}

impl GraphWhatsAppTransport {
    pub fn new(settings: &WhatsAppSettings, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::Configuration(format!("Failed to create WhatsApp client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            phone_number_id: settings.phone_number_id.clone(),
            access_token: settings.access_token.clone(),
        })
    }
}

#[async_trait]
impl WhatsAppTransport for GraphWhatsAppTransport {
    async fn send_whatsapp(&self, to: &str, body: &str) -> Result<(), AppError> {
        let to = to_whatsapp_e164(to)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid WhatsApp number '{}'", to)))?;

        let url = format!("{}/{}/messages", self.base_url, self.phone_number_id);
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "preview_url": false, "body": body },
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::from_status("WhatsApp", status, &error_text));
        }

        tracing::debug!("WhatsApp message accepted for {}", to);
        Ok(())
    }
}
