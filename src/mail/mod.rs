pub mod auth;
pub mod graph;

use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::MailError;
use crate::table::{EmailStatus, InvestorRecord, InvestorTable};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    To,
    Cc,
    Bcc,
}

impl RecipientKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "to" => Some(Self::To),
            "cc" => Some(Self::Cc),
            "bcc" => Some(Self::Bcc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
        }
    }
}

/// Colleague copied on every message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InternalRecipient {
    pub email_address: String,
    pub email_type: RecipientKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content_base64: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub subject: String,
    pub body: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub attachment: Attachment,
}

/// Result of a request the API answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    Rejected { status: u16, body: String },
}

#[allow(async_fn_in_trait)]
pub trait MailTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<Delivery, MailError>;
}

pub struct BatchSettings<'a> {
    pub sender: &'a str,
    pub tax_year: &'a str,
    /// Every address is replaced by `sender`.
    pub test_mode: bool,
    pub email_limit: Option<usize>,
    pub internal_recipients: &'a [InternalRecipient],
    pub files_root: &'a Path,
    pub batch_timestamp: &'a str,
}

/// One attempted message, as written to the sent report.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SentRow {
    pub matching_key: String,
    pub investment_name: String,
    pub receiving_entity: String,
    pub first_name: String,
    pub matched_k1_filename: String,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub email_status: String,
    pub email_batch_timestamp: String,
}

/// Matched, active, not held back, not already sent.
pub fn is_eligible(row: &InvestorRecord) -> bool {
    row.matched_k1_filename.is_some()
        && row.active
        && !row.do_not_send_override
        && row.email_status != Some(EmailStatus::Sent)
}

/// Rows that would be sent, honoring the limit.
pub fn eligible_count(table: &InvestorTable, email_limit: Option<usize>) -> usize {
    let count = table.rows.iter().filter(|r| is_eligible(r)).count();
    email_limit.map_or(count, |limit| count.min(limit))
}

/// Sends one message per eligible row, in table order. A failed row records
/// its failure in `email_status` and the batch moves on.
pub async fn send_batch<T: MailTransport>(
    transport: &T,
    mut table: InvestorTable,
    settings: &BatchSettings<'_>,
) -> (InvestorTable, Vec<SentRow>) {
    let mut report = Vec::new();
    let eligible: Vec<usize> = table
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| is_eligible(row))
        .map(|(i, _)| i)
        .take(settings.email_limit.unwrap_or(usize::MAX))
        .collect();

    for (n, index) in eligible.into_iter().enumerate() {
        let row = &mut table.rows[index];
        let filename = row.matched_k1_filename.clone().unwrap_or_default();

        let (message, result) = match compose(row, settings) {
            Ok(message) => {
                let result = transport.send(&message).await;
                (Some(message), result)
            }
            Err(e) => (None, Err(e)),
        };

        let status = match result {
            Ok(Delivery::Accepted) => {
                let (to, cc, bcc) = joined_recipients(message.as_ref());
                tracing::info!("EMAIL {:03}: {} to [{}], cc [{}], bcc [{}]", n + 1, filename, to, cc, bcc);
                EmailStatus::Sent
            }
            Ok(Delivery::Rejected { status, body }) => {
                tracing::warn!("FAIL {:03}: {}, {}", n + 1, status, body);
                EmailStatus::fail(&format!("{status} {body}"))
            }
            Err(e) => {
                tracing::error!("ERROR {:03}: {}, {}", n + 1, filename, e);
                EmailStatus::error(&e.to_string())
            }
        };

        row.email_batch_timestamp = match status {
            EmailStatus::Sent => Some(settings.batch_timestamp.to_string()),
            _ => None,
        };
        row.email_status = Some(status);
        report.push(sent_row(row, message.as_ref()));
    }

    (table, report)
}

/// Builds the message for a row. Slots with an unknown type are sent as cc
/// and the row is updated to say so.
pub fn compose(row: &mut InvestorRecord, settings: &BatchSettings<'_>) -> Result<OutgoingMessage, MailError> {
    let filename = row.matched_k1_filename.clone().unwrap_or_default();
    let path = settings.files_root.join(&filename);
    let bytes = std::fs::read(&path).map_err(|source| MailError::Attachment { path, source })?;

    let address = |real: &str| {
        if settings.test_mode {
            settings.sender.to_string()
        } else {
            real.to_string()
        }
    };

    let (mut to, mut cc, mut bcc) = (Vec::new(), Vec::new(), Vec::new());
    for slot in row.emails.iter_mut() {
        let Some(real) = slot.address.as_deref() else { continue };
        let kind = match slot.kind.as_deref().and_then(RecipientKind::parse) {
            Some(kind) => kind,
            None => {
                slot.kind = Some(RecipientKind::Cc.as_str().to_string());
                RecipientKind::Cc
            }
        };
        push_recipient(kind, address(real), &mut to, &mut cc, &mut bcc);
    }
    for internal in settings.internal_recipients {
        push_recipient(internal.email_type, address(&internal.email_address), &mut to, &mut cc, &mut bcc);
    }

    let investment = row.investment_name.to_uppercase();
    let receiving = row.receiving_entity.to_uppercase();
    let year = settings.tax_year;

    Ok(OutgoingMessage {
        subject: format!("{investment} K-1 | TAX YEAR {year} | {}", row.receiving_entity),
        body: body_text(row, year),
        to,
        cc,
        bcc,
        attachment: Attachment {
            name: format!("{investment}_{year} PARTNERSHIP K-1_{receiving}.pdf"),
            content_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        },
    })
}

fn push_recipient(kind: RecipientKind, address: String, to: &mut Vec<String>, cc: &mut Vec<String>, bcc: &mut Vec<String>) {
    match kind {
        RecipientKind::To => to.push(address),
        RecipientKind::Cc => cc.push(address),
        RecipientKind::Bcc => bcc.push(address),
    }
}

fn body_text(row: &InvestorRecord, year: &str) -> String {
    format!(
        "Dear {first_name},\n\
         \n\
         I hope this email finds you well.\n\
         \n\
         I am pleased to inform you that your K-1 forms for the tax year {year} are now ready. \
         These documents detail your proportionate share of income, deductions, credits, and other \
         related financial data from our partnership.\n\
         \n\
         Please find attached your {year} K-1 forms, issued on behalf of {receiving}, for your \
         investment in {investment}, in {city}, {state}.\n\
         \n\
         We recommend that you review these forms carefully and consult with your tax advisor to \
         ensure accurate reporting on your tax return.\n\
         \n\
         If there are any questions or if you require further assistance, feel free to reach out to me directly.\n\
         \n\
         Thank you for your continued partnership and trust.\n",
        first_name = row.first_name,
        receiving = row.receiving_entity.to_uppercase(),
        investment = row.investment_name.to_uppercase(),
        city = row.investment_city.to_uppercase(),
        state = row.investment_state,
    )
}

fn joined_recipients(message: Option<&OutgoingMessage>) -> (String, String, String) {
    message
        .map(|m| (m.to.join(", "), m.cc.join(", "), m.bcc.join(", ")))
        .unwrap_or_default()
}

fn sent_row(row: &InvestorRecord, message: Option<&OutgoingMessage>) -> SentRow {
    let (to, cc, bcc) = joined_recipients(message);
    SentRow {
        matching_key: row.matching_key.clone(),
        investment_name: row.investment_name.clone(),
        receiving_entity: row.receiving_entity.clone(),
        first_name: row.first_name.clone(),
        matched_k1_filename: row.matched_k1_filename.clone().unwrap_or_default(),
        to,
        cc,
        bcc,
        email_status: row.email_status.as_ref().map(|s| s.to_string()).unwrap_or_default(),
        email_batch_timestamp: row.email_batch_timestamp.clone().unwrap_or_default(),
    }
}
