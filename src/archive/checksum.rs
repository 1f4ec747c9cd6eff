// src/archive/checksum.rs

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::trace;

/// Hex-encoded BLAKE3 digest of a file's contents.
///
/// Datasets are identified by content: two files with the same checksum are
/// treated as the same data by the execution memo and integrity checks.
pub fn checksum_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("opening {:?} for checksumming", path))?;
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading {:?} for checksumming", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let hash = hasher.finalize().to_hex().to_string();
    trace!(path = ?path, hash = %hash, "computed checksum");
    Ok(hash)
}

/// Hex-encoded BLAKE3 digest of an in-memory buffer.
pub fn checksum_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
