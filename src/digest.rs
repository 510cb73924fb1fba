//! Content digests for deduplication.
//!
//! Every comparison the consolidator makes between two files goes through
//! [`hash_file`]: SHA-256 of the file contents, rendered as 64 lowercase hex
//! characters. Content-based rather than name- or mtime-based, so two copies of
//! the same stylesheet saved under different archive suffixes compare equal.
//!
//! Collisions are treated as impossible; nothing downstream double-checks bytes.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

/// Length of a hex-encoded digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// SHA-256 of a file's contents, returned as a hex string.
///
/// The file is streamed through the hasher, so large media files are never held
/// in memory at once.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::with_capacity(1024 * 1024, File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of an in-memory buffer, hex-encoded.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Returns true when both files exist and have identical digests.
///
/// Any I/O error is surfaced to the caller; "could not compare" is not the same
/// as "different".
pub fn same_content(a: &Path, b: &Path) -> io::Result<bool> {
    Ok(hash_file(a)? == hash_file(b)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn hash_file_deterministic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.bin");
        fs::write(&path, b"hello world").unwrap();

        let h1 = hash_file(&path).unwrap();
        let h2 = hash_file(&path).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn hash_file_matches_hash_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.css");
        fs::write(&path, b"body { color: red }").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"body { color: red }"));
    }

    #[test]
    fn known_vector() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hash_file_changes_with_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.bin");

        fs::write(&path, b"version 1").unwrap();
        let h1 = hash_file(&path).unwrap();

        fs::write(&path, b"version 2").unwrap();
        let h2 = hash_file(&path).unwrap();

        assert_ne!(h1, h2);
    }

    #[test]
    fn same_content_compares_bytes_not_names() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("styles.css");
        let b = tmp.path().join("styles (1).css");
        let c = tmp.path().join("other.css");
        fs::write(&a, "x").unwrap();
        fs::write(&b, "x").unwrap();
        fs::write(&c, "y").unwrap();
        assert!(same_content(&a, &b).unwrap());
        assert!(!same_content(&a, &c).unwrap());
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(hash_file(&tmp.path().join("nope")).is_err());
    }
}
