use crate::err::{Result, RipperError};

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Collects the files to process under `input`.
///
/// A path naming a file is returned as is, whatever its suffix. Directories are walked
/// recursively for regular files whose name ends with `suffix` (compared
/// case-insensitively); the result is sorted. Entries below the root that cannot be read
/// are logged and skipped.
pub fn collect_files(input: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    info!("collecting Evtx files.");

    if !input.exists() {
        return Err(RipperError::InputPathMissing {
            path: input.to_path_buf(),
        });
    }

    if input.is_file() {
        info!("Files found: 1");
        return Ok(vec![input.to_path_buf()]);
    }

    let suffix = suffix.to_lowercase();
    let mut files = Vec::new();

    for entry in WalkDir::new(input).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if has_suffix(entry.path(), &suffix) {
            debug!("found {}", entry.path().display());
            files.push(entry.into_path());
        }
    }

    files.sort();
    info!("Files found: {}", files.len());

    Ok(files)
}

fn has_suffix(path: &Path, lowercase_suffix: &str) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_lowercase().ends_with(lowercase_suffix))
        .unwrap_or(false)
}
