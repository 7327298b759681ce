use std::collections::HashSet;
use std::path::Path;

use walkdir::WalkDir;

use super::DocumentRecord;
use crate::error::ExtractError;

/// File names containing this (any case) are manager copies, not partner K-1s.
const EXCLUDED_NAME_FRAGMENT: &str = "managers";

pub struct Discovery {
    pub records: Vec<DocumentRecord>,
    pub new_count: usize,
    /// Directory entries the walk could not read; logged and skipped.
    pub unreadable: usize,
}

/// Appends every `<group>/<file>.pdf` under `files_root` not already in
/// `known`. Existing records keep their position and contents.
pub fn discover(files_root: &Path, known: Vec<DocumentRecord>) -> Result<Discovery, ExtractError> {
    if !files_root.is_dir() {
        return Err(ExtractError::MissingRoot(files_root.to_path_buf()));
    }

    let mut seen: HashSet<String> = known.iter().map(|r| r.path.clone()).collect();
    let mut records = known;
    let mut new_count = 0;
    let mut unreadable = 0;

    let walker = WalkDir::new(files_root)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {:?}: {}", files_root, e);
                unreadable += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !path.extension().map_or(false, |e| e.eq_ignore_ascii_case("pdf")) {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        if file_name.to_lowercase().contains(EXCLUDED_NAME_FRAGMENT) {
            tracing::debug!("Skipping manager copy: {:?}", path);
            continue;
        }

        let Some(group) = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|g| g.to_string_lossy().to_string())
        else {
            continue;
        };

        let record = DocumentRecord::new(&group, &file_name);
        if seen.insert(record.path.clone()) {
            records.push(record);
            new_count += 1;
        }
    }

    Ok(Discovery { records, new_count, unreadable })
}
