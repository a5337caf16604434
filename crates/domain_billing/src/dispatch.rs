//! Invoice delivery: recipients and the email payload

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use core_kernel::{DomainPort, InvoiceId, PortError};

use crate::error::BillingError;
use crate::invoice::InvoiceRecord;
use crate::period::BillingPeriod;
use crate::ports::TimesheetRenderer;
use crate::settings::{VendorBillingSettings, VendorContact};

/// Who an invoice email goes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    pub to: String,
    pub cc: Vec<String>,
}

fn usable(email: Option<&str>) -> Option<&str> {
    email.map(str::trim).filter(|e| !e.is_empty())
}

/// `local@domain` with no whitespace or display-name syntax
fn is_deliverable(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
        && !email
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '<' | '>' | ',' | ';' | '"'))
}

impl Recipients {
    /// Primary contact, falling back to the vendor's invoice address
    ///
    /// CC holds every other contact flagged to receive invoices, plus the
    /// vendor address when it is not already the `to`, deduplicated
    /// case-insensitively. Addresses that cannot be delivered to are
    /// skipped; if that leaves no `to`, the vendor cannot be invoiced by
    /// email.
    pub fn resolve(
        settings: &VendorBillingSettings,
        contacts: &[VendorContact],
    ) -> Result<Self, BillingError> {
        let mut rejected = Vec::new();
        let mut valid = |email: &str| {
            if is_deliverable(email) {
                true
            } else {
                rejected.push(email.to_string());
                false
            }
        };

        let vendor_email = usable(settings.invoice_email.as_deref()).filter(|e| valid(*e));
        let primary = contacts
            .iter()
            .filter(|c| c.is_primary)
            .filter_map(|c| usable(c.email.as_deref()))
            .find(|e| valid(*e));

        let Some(to) = primary.or(vendor_email) else {
            let mut message = format!(
                "No invoice recipient for {}: add a primary contact email or a vendor invoice email",
                settings.vendor_name
            );
            if !rejected.is_empty() {
                message.push_str(&format!(" (invalid: {})", rejected.join(", ")));
            }
            return Err(BillingError::MissingPrerequisite(message));
        };

        let mut seen = HashSet::new();
        seen.insert(to.to_lowercase());

        let cc = contacts
            .iter()
            .filter(|c| c.receives_invoices)
            .filter_map(|c| usable(c.email.as_deref()))
            .filter(|email| {
                let deliverable = is_deliverable(email);
                if !deliverable {
                    warn!(vendor_id = %settings.vendor_id, email = %email, "Skipping invalid CC address");
                }
                deliverable
            })
            .chain(vendor_email)
            .filter(|email| seen.insert(email.to_lowercase()))
            .map(str::to_string)
            .collect();

        Ok(Self {
            to: to.to_string(),
            cc,
        })
    }
}

/// A file sent alongside the invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Input to the timesheet renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimesheetDocument {
    pub invoice_number: String,
    pub vendor_name: String,
    pub period_label: String,
    /// Full breakdown
    pub body: String,
}

impl TimesheetDocument {
    pub fn filename(&self, extension: &str) -> String {
        format!("timesheet-{}.{}", self.invoice_number, extension)
    }
}

/// Renders the breakdown as a plain-text file
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextTimesheetRenderer;

impl DomainPort for PlainTextTimesheetRenderer {}

impl TimesheetRenderer for PlainTextTimesheetRenderer {
    fn render(&self, document: &TimesheetDocument) -> Result<Attachment, PortError> {
        let content = format!(
            "Timesheet for invoice {}\n{}\n{}\n\n{}\n",
            document.invoice_number, document.vendor_name, document.period_label, document.body
        );
        Ok(Attachment {
            filename: document.filename("txt"),
            content_type: "text/plain; charset=utf-8".to_string(),
            content: content.into_bytes(),
        })
    }
}

/// A composed invoice email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceEmail {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub recipients: Recipients,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl InvoiceEmail {
    pub fn compose(
        invoice: &InvoiceRecord,
        vendor_name: &str,
        period: &BillingPeriod,
        recipients: Recipients,
        sender_name: &str,
        attachment: Option<Attachment>,
    ) -> Self {
        let subject = format!("Invoice {} for {}", invoice.invoice_number, period.label());
        let mut body = format!(
            "Dear {vendor_name},\n\n\
             Please find invoice {number} for {period}.\n\n\
             Amount due: {total}\n\
             Due date: {due}\n\n\
             {notes}\n",
            vendor_name = vendor_name,
            number = invoice.invoice_number,
            period = period.label(),
            total = invoice.total,
            due = invoice.due_date.format("%-d %B %Y"),
            notes = invoice.notes,
        );
        if attachment.is_some() {
            body.push_str("\nA full timesheet breakdown is attached.\n");
        }
        body.push_str(&format!("\nKind regards,\n{}\n", sender_name));

        Self {
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number.clone(),
            recipients,
            subject,
            body,
            attachments: attachment.into_iter().collect(),
        }
    }
}

/// What the mail service reports back
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
}
