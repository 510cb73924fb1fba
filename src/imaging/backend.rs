//! Image codec trait and shared types.
//!
//! The [`ImageCodec`] trait has a single operation: recompress a file in place
//! and report whether the result was kept. The production implementation is
//! [`RustCodec`](super::rust_backend::RustCodec); tests use the recording mock
//! below.

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported image format: {0}")]
    Unsupported(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Outcome of one recompression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recompression {
    /// The file on disk was replaced.
    pub changed: bool,
    pub old_size: u64,
    /// Size on disk afterwards; equals `old_size` when unchanged.
    pub new_size: u64,
}

impl Recompression {
    pub fn unchanged(size: u64) -> Self {
        Self {
            changed: false,
            old_size: size,
            new_size: size,
        }
    }

    pub fn saved(&self) -> u64 {
        self.old_size.saturating_sub(self.new_size)
    }
}

/// Trait for image recompression backends.
///
/// Implementations must never leave a file larger than it was, and must leave
/// it untouched on error.
pub trait ImageCodec: Sync {
    /// Recompress `path` in place.
    fn recompress(&self, path: &Path) -> Result<Recompression, CodecError>;
}
