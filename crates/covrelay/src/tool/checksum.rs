//! SHA-256 pinning for fetched and on-disk tools.

use crate::result::AcquisitionError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Hex SHA-256 of `bytes`
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Whether `digest` is 64 hex characters
#[must_use]
pub fn is_valid_digest(digest: &str) -> bool {
    digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
}

/// Check `bytes` against the pinned digest (case-insensitive)
///
/// # Errors
///
/// Returns [`AcquisitionError::ChecksumMismatch`] when the digests differ
pub fn verify(bytes: &[u8], expected: &str) -> Result<(), AcquisitionError> {
    let actual = sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(AcquisitionError::ChecksumMismatch {
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        })
    }
}

/// Check a file on disk against the pinned digest
///
/// # Errors
///
/// Returns error if the file cannot be read or the digests differ
pub fn verify_file(path: &Path, expected: &str) -> Result<(), AcquisitionError> {
    let bytes = std::fs::read(path)?;
    verify(&bytes, expected)
}
