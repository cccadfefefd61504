//! SHA-256 gate over the downloaded artifact.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::UpdateError;

/// Streaming SHA-256 of a file, as lowercase hex.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub async fn sha256_file_hex(path: &Path) -> Result<String, UpdateError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Case-insensitive comparison of two hex digests.
#[must_use]
pub fn hashes_match(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected)
}
