use std::fmt;

/// Per-row delivery state stored in the `email_status` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailStatus {
    FileFound,
    Sent,
    Fail(String),
    Error(String),
    /// Anything else an operator typed into the sheet; carried through as-is.
    Other(String),
}

/// Longest detail kept after `fail: ` / `error: `. Response bodies can be
/// arbitrarily large and the status lives in a spreadsheet cell.
pub const DETAIL_LIMIT: usize = 1_000;

impl EmailStatus {
    pub fn fail(detail: &str) -> Self {
        Self::Fail(truncate(detail))
    }

    pub fn error(detail: &str) -> Self {
        Self::Error(truncate(detail))
    }

    /// `None` for an empty cell.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
            return None;
        }
        Some(match raw {
            "file_found" => Self::FileFound,
            "sent" => Self::Sent,
            _ => {
                if let Some(detail) = raw.strip_prefix("fail: ") {
                    Self::Fail(detail.to_string())
                } else if let Some(detail) = raw.strip_prefix("error: ") {
                    Self::Error(detail.to_string())
                } else {
                    Self::Other(raw.to_string())
                }
            }
        })
    }
}

fn truncate(detail: &str) -> String {
    detail.trim().chars().take(DETAIL_LIMIT).collect()
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileFound => write!(f, "file_found"),
            Self::Sent => write!(f, "sent"),
            Self::Fail(detail) => write!(f, "fail: {detail}"),
            Self::Error(detail) => write!(f, "error: {detail}"),
            Self::Other(raw) => write!(f, "{raw}"),
        }
    }
}
