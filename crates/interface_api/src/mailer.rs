//! SMTP invoice mailer
//!
//! Delivers composed invoice emails through an SMTP relay with STARTTLS.
//! Without SMTP settings the mailer reports itself unconfigured and the
//! engine leaves invoices as drafts.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment as MailAttachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;
use tracing::info;

use core_kernel::{DomainPort, PortError};
use domain_billing::{DeliveryReceipt, InvoiceEmail, InvoiceMailer};

use crate::config::SmtpSettings;

const SERVICE: &str = "smtp";

/// Errors raised while setting the mailer up
#[derive(Debug, Error)]
pub enum MailerError {
    #[error("Invalid SMTP configuration: {0}")]
    Configuration(String),
}

/// Invoice mailer backed by lettre's async SMTP transport
pub struct SmtpInvoiceMailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Option<Mailbox>,
}

impl SmtpInvoiceMailer {
    /// Builds the transport, or an unconfigured mailer when `settings` is `None`
    pub fn new(settings: Option<SmtpSettings>) -> Result<Self, MailerError> {
        let Some(settings) = settings else {
            return Ok(Self::unconfigured());
        };

        let from: Mailbox = format!("{} <{}>", settings.from_name, settings.from_email)
            .parse()
            .map_err(|e| MailerError::Configuration(format!("Invalid from address: {}", e)))?;

        let creds = Credentials::new(settings.user, settings.password);
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| MailerError::Configuration(format!("Failed to create SMTP relay: {}", e)))?
            .port(settings.port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport: Some(transport),
            from: Some(from),
        })
    }

    /// A mailer that never sends
    pub fn unconfigured() -> Self {
        Self {
            transport: None,
            from: None,
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, PortError> {
    address
        .parse()
        .map_err(|e| PortError::validation(format!("Invalid recipient '{}': {}", address, e)))
}

/// Builds the MIME message: plain-text body plus any attachments
pub fn build_message(from: &Mailbox, email: &InvoiceEmail) -> Result<Message, PortError> {
    let mut builder = Message::builder()
        .from(from.clone())
        .to(parse_mailbox(&email.recipients.to)?)
        .subject(email.subject.as_str());
    for cc in &email.recipients.cc {
        builder = builder.cc(parse_mailbox(cc)?);
    }

    let mut body = MultiPart::mixed().singlepart(SinglePart::plain(email.body.clone()));
    for attachment in &email.attachments {
        let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
            PortError::validation(format!(
                "Invalid content type '{}': {}",
                attachment.content_type, e
            ))
        })?;
        body = body.singlepart(
            MailAttachment::new(attachment.filename.clone())
                .body(attachment.content.clone(), content_type),
        );
    }

    builder
        .multipart(body)
        .map_err(|e| PortError::internal(format!("Failed to build message: {}", e)))
}

impl DomainPort for SmtpInvoiceMailer {}

#[async_trait]
impl InvoiceMailer for SmtpInvoiceMailer {
    fn is_configured(&self) -> bool {
        self.transport.is_some() && self.from.is_some()
    }

    async fn send(&self, email: &InvoiceEmail) -> Result<DeliveryReceipt, PortError> {
        let (Some(transport), Some(from)) = (self.transport.as_ref(), self.from.as_ref()) else {
            return Err(PortError::unavailable(SERVICE));
        };

        let message = build_message(from, email)?;
        let response = transport
            .send(message)
            .await
            .map_err(|e| PortError::rejected(SERVICE, e.to_string()))?;

        info!(
            invoice_number = %email.invoice_number,
            to = %email.recipients.to,
            cc = email.recipients.cc.len(),
            "Invoice email sent"
        );

        let message_id = response.message().next().map(str::to_string);
        Ok(DeliveryReceipt { message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::InvoiceId;
    use domain_billing::{Attachment, Recipients};

    fn email(to: &str) -> InvoiceEmail {
        InvoiceEmail {
            invoice_id: InvoiceId::new(),
            invoice_number: "INV-0001".to_string(),
            recipients: Recipients {
                to: to.to_string(),
                cc: vec!["finance@anchor.test".to_string()],
            },
            subject: "Invoice INV-0001 for September 2026".to_string(),
            body: "Amount due: £916.80".to_string(),
            attachments: vec![Attachment {
                filename: "timesheet-INV-0001.txt".to_string(),
                content_type: "text/plain; charset=utf-8".to_string(),
                content: b"Timesheet".to_vec(),
            }],
        }
    }

    fn sender() -> Mailbox {
        "Orange Jelly <billing@orangejelly.test>".parse().unwrap()
    }

    #[test]
    fn test_message_carries_recipients_and_attachment() {
        let message = build_message(&sender(), &email("accounts@anchor.test")).unwrap();
        let raw = String::from_utf8_lossy(&message.formatted()).to_string();

        assert!(raw.contains("accounts@anchor.test"));
        assert!(raw.contains("Cc: finance@anchor.test"));
        assert!(raw.contains("timesheet-INV-0001.txt"));
    }

    #[test]
    fn test_invalid_recipient_is_a_validation_error() {
        let error = build_message(&sender(), &email("not an address")).unwrap_err();
        assert!(matches!(error, PortError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_unconfigured_mailer_refuses_to_send() {
        let mailer = SmtpInvoiceMailer::new(None).unwrap();

        assert!(!mailer.is_configured());
        let error = mailer.send(&email("accounts@anchor.test")).await.unwrap_err();
        assert!(error.is_transient());
    }
}
