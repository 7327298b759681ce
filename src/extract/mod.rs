pub mod cache;
pub mod discovery;
pub mod resolver;

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;
use crate::recon::normalize;
use resolver::EntityResolver;

/// Marks the page carrying the partner's K-1.
pub const FORM_MARKER: &str = "Schedule K-1 (Form 1065)";

const START_CONTENT: &str = "<<<START_CONTENT>>>";
const END_CONTENT: &str = "<<<END_CONTENT>>>";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DocumentRecord {
    /// `<group>/<filename>`, relative to the input root.
    pub path: String,
    pub group_label: String,
    pub issuing_entity: Option<String>,
    pub receiving_entity: Option<String>,
    #[serde(default)]
    pub matching_key: Option<String>,
}

impl DocumentRecord {
    pub fn new(group_label: &str, file_name: &str) -> Self {
        Self {
            path: format!("{group_label}/{file_name}"),
            group_label: group_label.to_string(),
            issuing_entity: None,
            receiving_entity: None,
            matching_key: None,
        }
    }

    /// Nothing resolved yet; eligible for an extraction attempt.
    pub fn is_pending(&self) -> bool {
        self.issuing_entity.is_none() && self.receiving_entity.is_none()
    }

    pub fn computed_key(&self) -> String {
        normalize::matching_key(
            &self.group_label,
            self.issuing_entity.as_deref(),
            self.receiving_entity.as_deref(),
        )
    }

    pub fn with_key(mut self) -> Self {
        self.matching_key = Some(self.computed_key());
        self
    }
}

/// Yields the text of every page of a document, in order.
pub trait PageSource {
    fn pages(&self, path: &Path) -> Result<Vec<String>, ExtractError>;
}

/// Runs `pdf-extract` in a child copy of this binary so that decoder noise
/// and panics stay out of the batch process.
pub struct SubprocessPdfSource {
    exe: PathBuf,
}

impl SubprocessPdfSource {
    pub fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            exe: std::env::current_exe()?,
        })
    }
}

impl PageSource for SubprocessPdfSource {
    fn pages(&self, path: &Path) -> Result<Vec<String>, ExtractError> {
        let out = Command::new(&self.exe)
            .arg("extract-pdf")
            .arg(path)
            .output()?;

        if !out.status.success() {
            return Err(ExtractError::Child {
                path: path.to_path_buf(),
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&out.stdout);
        let body = content_block(&stdout).ok_or_else(|| ExtractError::MissingContent(path.to_path_buf()))?;
        Ok(serde_json::from_str(body)?)
    }
}

/// Child side of [`SubprocessPdfSource`]: wraps the page array in delimiters
/// to separate it from anything the PDF library prints.
pub fn format_content_block(pages: &[String]) -> Result<String, ExtractError> {
    Ok(format!("{START_CONTENT}{}{END_CONTENT}", serde_json::to_string(pages)?))
}

fn content_block(stdout: &str) -> Option<&str> {
    let start = stdout.find(START_CONTENT)? + START_CONTENT.len();
    let end = stdout[start..].find(END_CONTENT)? + start;
    Some(&stdout[start..end])
}

/// Lines of the first page carrying [`FORM_MARKER`]. Later pages are ignored.
pub fn form_page_lines(pages: &[String]) -> Option<Vec<String>> {
    pages
        .iter()
        .find(|text| text.contains(FORM_MARKER))
        .map(|text| text.lines().map(str::to_string).collect())
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractionStats {
    pub attempted: usize,
    pub resolved: usize,
    pub failed: usize,
}

/// One resolution attempt for every pending record, in collection order.
/// Resolved records pass through untouched. A failing document is logged and
/// left pending.
pub fn resolve_pending(
    records: Vec<DocumentRecord>,
    files_root: &Path,
    source: &impl PageSource,
    resolver: &EntityResolver,
) -> (Vec<DocumentRecord>, ExtractionStats) {
    let mut stats = ExtractionStats::default();

    let records = records
        .into_iter()
        .map(|mut record| {
            if !record.is_pending() {
                return record;
            }
            stats.attempted += 1;
            tracing::info!("EXTRACT {:03}: {}", stats.attempted, record.path);

            let pages = match source.pages(&files_root.join(&record.path)) {
                Ok(pages) => pages,
                Err(e) => {
                    tracing::warn!("Extraction failed for {}: {}", record.path, e);
                    stats.failed += 1;
                    return record;
                }
            };

            match form_page_lines(&pages).and_then(|lines| resolver.resolve(&lines)) {
                Some(entities) => {
                    record.issuing_entity = Some(entities.issuing);
                    record.receiving_entity = Some(entities.receiving);
                    stats.resolved += 1;
                }
                None => tracing::warn!("No entities resolved for {}", record.path),
            }
            record
        })
        .collect();

    (records, stats)
}
