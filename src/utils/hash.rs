//! Content hashing for referenced binaries and scripts.

use crate::core::error::{Error, Result};
use md5::{Digest, Md5};
use sha2::Sha256;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Buffer size for reading files (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Hash results for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHashes {
    /// SHA256 hash (primary)
    pub sha256: String,
    /// MD5 hash (for intel feeds that still publish it)
    pub md5: String,
    /// File size in bytes
    pub size: u64,
}

/// Hash calculator for files.
pub struct HashCalculator;

impl HashCalculator {
    /// Calculate both SHA256 and MD5 hashes of a file in a single pass.
    pub fn hash_file(path: &Path) -> Result<FileHashes> {
        Self::hash_file_limited(path, u64::MAX)
    }

    /// Like [`hash_file`](Self::hash_file), refusing files over `max_size` bytes.
    pub fn hash_file_limited(path: &Path, max_size: u64) -> Result<FileHashes> {
        let file = File::open(path).map_err(|e| Error::file_read(path, e))?;
        let metadata = file.metadata().map_err(|e| Error::file_read(path, e))?;
        let size = metadata.len();

        if !metadata.is_file() {
            return Err(Error::hash(path, "not a regular file"));
        }
        if size > max_size {
            return Err(Error::hash(
                path,
                format!("file is {} bytes, limit is {}", size, max_size),
            ));
        }

        let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
        let mut sha256_hasher = Sha256::new();
        let mut md5_hasher = Md5::new();
        let mut buffer = [0u8; BUFFER_SIZE];

        loop {
            let bytes_read = reader
                .read(&mut buffer)
                .map_err(|e| Error::file_read(path, e))?;
            if bytes_read == 0 {
                break;
            }
            sha256_hasher.update(&buffer[..bytes_read]);
            md5_hasher.update(&buffer[..bytes_read]);
        }

        Ok(FileHashes {
            sha256: hex::encode(sha256_hasher.finalize()),
            md5: hex::encode(md5_hasher.finalize()),
            size,
        })
    }
}

/// Whether a string is a well-formed hex digest of `len` characters.
pub fn is_hex_digest(s: &str, len: usize) -> bool {
    s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_hash_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"hello world").unwrap();
        temp_file.flush().unwrap();

        let hashes = HashCalculator::hash_file(temp_file.path()).unwrap();
        assert_eq!(
            hashes.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(hashes.md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(hashes.size, 11);
    }

    #[test]
    fn test_size_limit() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"hello world").unwrap();
        temp_file.flush().unwrap();

        let err = HashCalculator::hash_file_limited(temp_file.path(), 4).unwrap_err();
        assert!(matches!(err, Error::Hash { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = HashCalculator::hash_file(Path::new("/nonexistent/definitely/missing")).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }

    #[test]
    fn test_is_hex_digest() {
        assert!(is_hex_digest("5eb63bbbe01eeed093cb22bb8f5acdc3", 32));
        assert!(!is_hex_digest("zzb63bbbe01eeed093cb22bb8f5acdc3", 32));
        assert!(!is_hex_digest("abc", 32));
    }
}
