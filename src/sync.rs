//! Mirrors the audit artifacts (`logs/`, `snapshots/`, `dumps/`) to a
//! shared destination.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

pub const ARTIFACT_DIRS: [&str; 3] = ["logs", "snapshots", "dumps"];

/// Somewhere artifacts can be pushed to.
pub trait ArtifactSink {
    /// Fails when the destination cannot be used at all.
    fn prepare(&self) -> Result<()>;
    /// Returns `false` when the destination already holds an identical copy.
    fn put(&self, relative: &Path, source: &Path) -> Result<bool>;
}

/// A plain directory, usually a mounted share.
pub struct DirectoryMirror {
    dest: PathBuf,
}

impl DirectoryMirror {
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self { dest: dest.into() }
    }
}

impl ArtifactSink for DirectoryMirror {
    fn prepare(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dest)
            .with_context(|| format!("sync destination {:?} is not usable", self.dest))?;
        if !self.dest.is_dir() {
            anyhow::bail!("sync destination {:?} is not a directory", self.dest);
        }
        Ok(())
    }

    fn put(&self, relative: &Path, source: &Path) -> Result<bool> {
        let target = self.dest.join(relative);
        let src_meta = std::fs::metadata(source)?;
        if let Ok(existing) = std::fs::metadata(&target) {
            let unchanged = existing.len() == src_meta.len()
                && matches!(
                    (existing.modified(), src_meta.modified()),
                    (Ok(theirs), Ok(ours)) if theirs >= ours
                );
            if unchanged {
                return Ok(false);
            }
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, &target).with_context(|| format!("copying {:?} to {:?}", source, target))?;
        Ok(true)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub copied: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Pushes every file under the artifact directories of `work_dir`. A file
/// that fails to copy is logged and counted; the rest still go.
pub fn sync_artifacts(work_dir: &Path, sink: &impl ArtifactSink) -> Result<SyncStats> {
    sink.prepare()?;
    let mut stats = SyncStats::default();

    for dir in ARTIFACT_DIRS {
        let root = work_dir.join(dir);
        if !root.exists() {
            continue;
        }
        for entry in WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative = entry.path().strip_prefix(work_dir).unwrap_or(entry.path());
            match sink.put(relative, entry.path()) {
                Ok(true) => {
                    tracing::debug!("SYNC: {:?}", relative);
                    stats.copied += 1;
                }
                Ok(false) => stats.unchanged += 1,
                Err(e) => {
                    tracing::warn!("SYNC failed for {:?}: {}", relative, e);
                    stats.failed += 1;
                }
            }
        }
    }

    tracing::info!(
        "Sync finished: {} copied, {} unchanged, {} failed",
        stats.copied,
        stats.unchanged,
        stats.failed
    );
    Ok(stats)
}
