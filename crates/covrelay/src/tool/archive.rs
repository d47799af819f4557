//! Release tarball extraction.

use crate::result::AcquisitionError;
use flate2::read::GzDecoder;
use std::io::{Read, Write};
use std::path::Path;
use tar::Archive;

/// Copy the entry named `entry` (matched by file name, at any depth) out of
/// a gzip tarball held in memory into `dest`
///
/// # Errors
///
/// Returns error if the archive is unreadable or holds no such entry
pub fn extract_entry(tgz: &[u8], entry: &str, dest: &Path) -> Result<(), AcquisitionError> {
    let extract_err = |message: String| AcquisitionError::Extract {
        entry: entry.to_string(),
        message,
    };

    let mut archive = Archive::new(GzDecoder::new(tgz));
    let entries = archive.entries().map_err(|e| extract_err(e.to_string()))?;

    for item in entries {
        let mut item = item.map_err(|e| extract_err(e.to_string()))?;
        if !item.header().entry_type().is_file() {
            continue;
        }
        let matches = item
            .path()
            .map_err(|e| extract_err(e.to_string()))?
            .file_name()
            .is_some_and(|name| name == entry);
        if !matches {
            continue;
        }

        let mut content = Vec::new();
        item.read_to_end(&mut content)
            .map_err(|e| extract_err(e.to_string()))?;
        let mut file = std::fs::File::create(dest)?;
        file.write_all(&content)?;
        file.sync_all()?;
        return Ok(());
    }

    Err(extract_err("no matching file in archive".to_string()))
}
