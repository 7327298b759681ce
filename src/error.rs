use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while discovering, extracting or caching K-1 documents.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("input directory '{0}' does not exist")]
    MissingRoot(PathBuf),
    #[error("page extraction for '{path}' exited with {status}: {stderr}")]
    Child {
        path: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("page extraction for '{0}' produced no content block")]
    MissingContent(PathBuf),
    #[error("page extraction output is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("cache encoding failure: {0}")]
    Cache(#[from] bincode::Error),
    #[error("invalid resolver pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failures reading or writing the investor table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("cannot open investor table '{path}': {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("investor table '{0}' has no worksheet")]
    NoWorksheet(PathBuf),
    #[error("investor table is missing required column '{0}'")]
    MissingColumn(String),
    #[error("cannot write investor table: {0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),
}

/// Failures talking to the mail API or its token endpoint.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("missing mail credential: {0} is not set")]
    MissingCredential(&'static str),
    #[error("token request rejected ({status}): {body}")]
    Token { status: u16, body: String },
    #[error("cannot read attachment '{path}': {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
