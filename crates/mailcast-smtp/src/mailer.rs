//! SMTP sending via async lettre. One pooled mailer per job; construction
//! failures are fatal to the job, per-message failures are retryable.

use async_trait::async_trait;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Attachment, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use mailcast_core::config::SmtpSection;
use mailcast_core::error::{MailcastError, Result};
use mailcast_core::traits::{Transport, TransportFactory};
use mailcast_core::types::RenderedEmail;

/// Campaign tracking header, mirrored into every outgoing message.
#[derive(Debug, Clone)]
struct CampaignIdHeader(String);

impl Header for CampaignIdHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Campaign-ID")
    }

    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// SMTP transport — wraps a pooled async lettre mailer.
pub struct SmtpMailer {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Build a STARTTLS mailer from config. Fails with `Transport` if the
    /// relay or from-address is unusable — the job must not start.
    pub fn connect(config: &SmtpSection) -> Result<Self> {
        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|e| MailcastError::Transport(format!("Invalid from address: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| MailcastError::Transport(format!("SMTP relay: {e}")))?
            .port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }

    fn build_message(&self, email: &RenderedEmail) -> Result<Message> {
        let to: Mailbox = match &email.to_name {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, email.to)
                .parse()
                .or_else(|_| email.to.parse()),
            _ => email.to.parse(),
        }
        .map_err(|e| MailcastError::Send(format!("Invalid recipient {}: {e}", email.to)))?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .header(CampaignIdHeader(email.campaign_id.clone()));

        let html_part = SinglePart::html(email.html.clone());
        let message = if email.inline.is_empty() {
            builder.singlepart(html_part)
        } else {
            let mut related = MultiPart::related().singlepart(html_part);
            for res in &email.inline {
                let content_type = ContentType::parse(sniff_image_mime(&res.data))
                    .map_err(|e| MailcastError::Send(format!("Content type: {e}")))?;
                related = related.singlepart(
                    Attachment::new_inline(res.cid.clone()).body(res.data.clone(), content_type),
                );
            }
            builder.multipart(related)
        };

        message.map_err(|e| MailcastError::Send(format!("Build message: {e}")))
    }
}

#[async_trait]
impl Transport for SmtpMailer {
    async fn send(&self, email: &RenderedEmail) -> Result<()> {
        let message = self.build_message(email)?;
        self.mailer
            .send(message)
            .await
            .map_err(|e| MailcastError::Send(format!("SMTP send to {}: {e}", email.to)))?;
        tracing::debug!("📤 Sent to {}", email.to);
        Ok(())
    }
}

/// Builds one `SmtpMailer` per job from shared config.
pub struct SmtpTransportFactory {
    config: SmtpSection,
}

impl SmtpTransportFactory {
    pub fn new(config: SmtpSection) -> Self {
        Self { config }
    }
}

impl TransportFactory for SmtpTransportFactory {
    fn create(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(SmtpMailer::connect(&self.config)?))
    }
}

/// Identify common inline-image formats from magic bytes.
fn sniff_image_mime(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.starts_with(b"GIF8") {
        "image/gif"
    } else if data.len() > 11 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}
