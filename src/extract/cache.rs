//! Path-keyed extraction cache.
//!
//! On disk: a bincode `u32` schema version followed by the record list.
//! A cache written under another schema is ignored rather than decoded.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::DocumentRecord;
use crate::error::ExtractError;

pub const CACHE_SCHEMA_VERSION: u32 = 1;

pub struct ExtractionCache {
    path: PathBuf,
}

impl ExtractionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached records, or an empty list when the file is absent, stale or
    /// unreadable.
    pub fn load(&self) -> Vec<DocumentRecord> {
        if !self.path.exists() {
            tracing::info!("CACHE: Not found");
            return Vec::new();
        }

        match self.read() {
            Ok(records) => {
                tracing::info!("CACHE: Loaded {} items", records.len());
                records
            }
            Err(e) => {
                tracing::warn!("CACHE: Ignoring {:?}: {}", self.path, e);
                Vec::new()
            }
        }
    }

    fn read(&self) -> Result<Vec<DocumentRecord>, ExtractError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let version: u32 = bincode::deserialize_from(&mut reader)?;
        if version != CACHE_SCHEMA_VERSION {
            return Err(ExtractError::Cache(Box::new(bincode::ErrorKind::Custom(format!(
                "schema version {version}, expected {CACHE_SCHEMA_VERSION}"
            )))));
        }
        Ok(bincode::deserialize_from(&mut reader)?)
    }

    /// Replaces the cache file atomically.
    pub fn save(&self, records: &[DocumentRecord]) -> Result<(), ExtractError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            bincode::serialize_into(&mut writer, &CACHE_SCHEMA_VERSION)?;
            bincode::serialize_into(&mut writer, records)?;
            writer.flush()?;
        }
        tmp.persist(&self.path).map_err(|e| e.error)?;
        tracing::info!("CACHE: Saved {} items", records.len());
        Ok(())
    }
}
