use crate::Collector;
use anyhow::{Context, Result};
pub use oxport_common::snapshot::FileHash;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Number of trailing hex digits of the SHA-256 digest kept as the gauge value.
/// Ten digits (40 bits) stay exact in an `f64`.
const HASH_SUFFIX_DIGITS: usize = 10;

pub struct FileHashCollector {
    files: Vec<PathBuf>,
}

impl FileHashCollector {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }
}

impl Collector for FileHashCollector {
    type Output = Vec<FileHash>;

    fn name(&self) -> &str {
        "file_hash"
    }

    /// Missing files report `0`; files that exist but cannot be read are
    /// skipped so their previous value stays in place.
    fn collect(&mut self) -> Result<Vec<FileHash>> {
        let mut hashes = Vec::with_capacity(self.files.len());
        for path in &self.files {
            let hash = if path.exists() {
                match file_hash_value(path) {
                    Ok(hash) => hash,
                    Err(e) => {
                        tracing::warn!(file = %path.display(), error = %e, "Failed to hash file");
                        continue;
                    }
                }
            } else {
                0.0
            };
            hashes.push(FileHash {
                file: path.display().to_string(),
                hash,
            });
        }
        Ok(hashes)
    }
}

/// SHA-256 of the file contents, reduced to the integer value of the last
/// [`HASH_SUFFIX_DIGITS`] hex digits.
pub fn file_hash_value(path: &Path) -> Result<f64> {
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let digest = hex::encode(Sha256::digest(&content));
    let suffix = &digest[digest.len() - HASH_SUFFIX_DIGITS..];
    let number = u64::from_str_radix(suffix, 16).context("Failed to convert hash to number")?;
    Ok(number as f64)
}
