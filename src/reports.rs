//! Per-run audit artifacts. File names carry the run timestamp so runs never
//! overwrite each other.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::extract::DocumentRecord;
use crate::mail::SentRow;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn run_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Documents whose key found no investor row.
pub fn write_unmatched_csv(logs_dir: &Path, ts: &str, unmatched: &[DocumentRecord]) -> Result<PathBuf> {
    let path = logs_dir.join(format!("{ts}_unmatched.csv"));
    write_csv(&path, unmatched)?;
    tracing::info!("Wrote {} unmatched documents to {:?}", unmatched.len(), path);
    Ok(path)
}

pub fn write_sent_csv(logs_dir: &Path, ts: &str, rows: &[SentRow]) -> Result<PathBuf> {
    let path = logs_dir.join(format!("{ts}_sent.csv"));
    write_csv(&path, rows)?;
    tracing::info!("Wrote send report ({} rows) to {:?}", rows.len(), path);
    Ok(path)
}

/// Pretty JSON of the whole record collection, as the run saw it.
pub fn write_document_dump(dumps_dir: &Path, ts: &str, records: &[DocumentRecord]) -> Result<PathBuf> {
    let path = dumps_dir.join(format!("{ts}_documents.json"));
    let contents = serde_json::to_string_pretty(records)?;
    std::fs::write(&path, contents).with_context(|| format!("writing {:?}", path))?;
    tracing::debug!("Dumped {} document records to {:?}", records.len(), path);
    Ok(path)
}

/// Copies the investor table aside before anything rewrites it. A missing
/// table is not an error; the run goes on without a snapshot.
pub fn snapshot_table(table: &Path, snapshots_dir: &Path, ts: &str) -> Result<Option<PathBuf>> {
    if !table.exists() {
        tracing::warn!("SNAPSHOT: {:?} not found, skipping", table);
        return Ok(None);
    }
    let dest = snapshots_dir.join(format!("{ts}_investors.xlsx"));
    std::fs::copy(table, &dest).with_context(|| format!("copying {:?} to {:?}", table, dest))?;
    tracing::info!("SNAPSHOT: {:?}", dest);
    Ok(Some(dest))
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {:?}", path))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
