//! The investor system-of-record table.
//!
//! Known columns are lifted into [`InvestorRecord`] fields; every other
//! column is kept verbatim so the sheet round-trips.

pub mod status;
pub mod xlsx;

use std::collections::HashMap;

pub use status::EmailStatus;

use crate::error::TableError;

pub const MATCHING_KEY: &str = "matching_key";
pub const MATCHING_KEY_ALIAS: &str = "k1_matching_key";
pub const EMAIL_STATUS: &str = "email_status";
pub const EMAIL_BATCH_TIMESTAMP: &str = "email_batch_timestamp";
pub const MATCHED_FILENAME: &str = "matched_k1_filename";

/// Address/type pairs per row.
pub const EMAIL_SLOTS: usize = 4;

/// Columns the pipeline writes even if the sheet lacks them.
const OUTPUT_COLUMNS: [&str; 3] = [EMAIL_STATUS, EMAIL_BATCH_TIMESTAMP, MATCHED_FILENAME];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Excel serial date; written back with a date format so the column
    /// stays a date.
    DateTime(f64),
}

impl Cell {
    pub fn text(value: &str) -> Self {
        if value.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value.to_string())
        }
    }

    pub fn optional(value: Option<&str>) -> Self {
        value.map_or(Cell::Empty, Cell::text)
    }

    /// Text form; whole numbers lose their trailing `.0`.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
            Cell::Bool(b) => b.to_string(),
            Cell::DateTime(serial) => match excel_datetime(*serial) {
                Some(dt) if serial.fract() == 0.0 => dt.format("%Y-%m-%d").to_string(),
                Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
                None => serial.to_string(),
            },
        }
    }

    fn as_optional_text(&self) -> Option<String> {
        let text = self.as_text();
        if text.is_empty() || text.eq_ignore_ascii_case("nan") {
            None
        } else {
            Some(text)
        }
    }

    /// Spreadsheet truthiness for flag columns; blank is false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Cell::Empty => false,
            Cell::Bool(b) => *b,
            Cell::Number(n) | Cell::DateTime(n) => *n != 0.0,
            Cell::Text(s) => matches!(
                s.trim().to_lowercase().as_str(),
                "true" | "yes" | "y" | "1" | "x"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailSlot {
    pub address: Option<String>,
    /// Raw `email_type_N` value; see `mail::RecipientKind::parse`.
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvestorRecord {
    /// As stored in the sheet; normalized at join time.
    pub matching_key: String,
    pub first_name: String,
    pub investment_name: String,
    pub investment_city: String,
    pub investment_state: String,
    pub receiving_entity: String,
    pub emails: [EmailSlot; EMAIL_SLOTS],
    pub active: bool,
    pub do_not_send_override: bool,
    pub email_status: Option<EmailStatus>,
    pub email_batch_timestamp: Option<String>,
    pub matched_k1_filename: Option<String>,
    pub extra: HashMap<String, Cell>,
}

impl InvestorRecord {
    pub fn from_cells(mut cells: HashMap<String, Cell>) -> Self {
        let mut take = |column: &str| cells.remove(column).unwrap_or(Cell::Empty);

        let key_cell = match take(MATCHING_KEY) {
            Cell::Empty => take(MATCHING_KEY_ALIAS),
            cell => cell,
        };

        let mut emails: [EmailSlot; EMAIL_SLOTS] = Default::default();
        for (i, slot) in emails.iter_mut().enumerate() {
            slot.address = take(format!("email_address_{}", i + 1).as_str()).as_optional_text();
            slot.kind = take(format!("email_type_{}", i + 1).as_str()).as_optional_text();
        }

        let batch_cell = take(EMAIL_BATCH_TIMESTAMP);

        let mut record = Self {
            matching_key: key_cell.as_text(),
            first_name: take("first_name").as_text(),
            investment_name: take("investment_name").as_text(),
            investment_city: take("investment_city").as_text(),
            investment_state: take("investment_state").as_text(),
            receiving_entity: take("receiving_entity").as_text(),
            emails,
            active: take("active").is_truthy(),
            do_not_send_override: take("do_not_send_override").is_truthy(),
            email_status: EmailStatus::parse(&take(EMAIL_STATUS).as_text()),
            email_batch_timestamp: batch_cell.as_optional_text(),
            matched_k1_filename: take(MATCHED_FILENAME).as_optional_text(),
            extra: cells,
        };
        // An operator-typed date is written back as the same date unless the
        // batch timestamp changes.
        if let Cell::DateTime(_) = batch_cell {
            record.extra.insert(EMAIL_BATCH_TIMESTAMP.to_string(), batch_cell);
        }
        record
    }

    /// Value for `column` when writing the sheet back.
    pub fn cell(&self, column: &str) -> Cell {
        if let Some((field, index)) = email_slot_column(column) {
            let slot = &self.emails[index];
            let value = if field == "address" { &slot.address } else { &slot.kind };
            return Cell::optional(value.as_deref());
        }

        match column {
            MATCHING_KEY | MATCHING_KEY_ALIAS => Cell::text(&self.matching_key),
            "first_name" => Cell::text(&self.first_name),
            "investment_name" => Cell::text(&self.investment_name),
            "investment_city" => Cell::text(&self.investment_city),
            "investment_state" => Cell::text(&self.investment_state),
            "receiving_entity" => Cell::text(&self.receiving_entity),
            "active" => Cell::Bool(self.active),
            "do_not_send_override" => Cell::Bool(self.do_not_send_override),
            EMAIL_STATUS => Cell::optional(self.email_status.as_ref().map(|s| s.to_string()).as_deref()),
            EMAIL_BATCH_TIMESTAMP => match self.extra.get(EMAIL_BATCH_TIMESTAMP) {
                Some(original) if original.as_optional_text() == self.email_batch_timestamp => original.clone(),
                _ => Cell::optional(self.email_batch_timestamp.as_deref()),
            },
            MATCHED_FILENAME => Cell::optional(self.matched_k1_filename.as_deref()),
            other => self.extra.get(other).cloned().unwrap_or(Cell::Empty),
        }
    }
}

/// Excel serial (days since 1899-12-30, fraction is time of day) to a
/// calendar date-time.
pub fn excel_datetime(serial: f64) -> Option<chrono::NaiveDateTime> {
    if !(0.0..2_958_466.0).contains(&serial) {
        return None;
    }
    let epoch = chrono::NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    epoch.checked_add_signed(chrono::Duration::milliseconds((serial * 86_400_000.0).round() as i64))
}

/// `email_address_3` -> `("address", 2)`.
fn email_slot_column(column: &str) -> Option<(&'static str, usize)> {
    let (field, n) = if let Some(n) = column.strip_prefix("email_address_") {
        ("address", n)
    } else if let Some(n) = column.strip_prefix("email_type_") {
        ("type", n)
    } else {
        return None;
    };
    match n.parse::<usize>() {
        Ok(n) if (1..=EMAIL_SLOTS).contains(&n) => Some((field, n - 1)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvestorTable {
    /// Header order as read, followed by any output columns the sheet lacked.
    pub columns: Vec<String>,
    pub rows: Vec<InvestorRecord>,
}

impl InvestorTable {
    pub fn new(mut columns: Vec<String>, rows: Vec<InvestorRecord>) -> Result<Self, TableError> {
        if !columns.iter().any(|c| c == MATCHING_KEY || c == MATCHING_KEY_ALIAS) {
            return Err(TableError::MissingColumn(MATCHING_KEY.to_string()));
        }
        for column in OUTPUT_COLUMNS {
            if !columns.iter().any(|c| c == column) {
                columns.push(column.to_string());
            }
        }
        Ok(Self { columns, rows })
    }

    pub fn with_rows(self, rows: Vec<InvestorRecord>) -> Self {
        Self { rows, ..self }
    }

    /// Clears delivery state on every row.
    pub fn with_status_reset(mut self) -> Self {
        for row in &mut self.rows {
            row.email_status = None;
            row.email_batch_timestamp = None;
        }
        self
    }
}
