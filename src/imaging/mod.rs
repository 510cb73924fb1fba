//! Lossless-or-better raster recompression of consolidated images.
//!
//! The module is split into:
//! - **Backend**: [`ImageCodec`] trait, [`Recompression`] result, mock codec
//! - **Rust backend**: [`RustCodec`], the `image` crate implementation
//!
//! [`optimize_images`] walks `assets/images/` and runs the codec over every
//! supported file in parallel.

pub mod backend;
pub mod rust_backend;

pub use backend::{CodecError, ImageCodec, Recompression};
pub use rust_backend::{DEFAULT_JPEG_QUALITY, RustCodec, SUPPORTED_EXTENSIONS};

use crate::paths;
use crate::types::AssetClass;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImageStats {
    pub files: usize,
    pub optimized: usize,
    pub bytes_saved: u64,
    pub failures: usize,
}

impl ImageStats {
    fn merge(mut self, other: ImageStats) -> Self {
        self.files += other.files;
        self.optimized += other.optimized;
        self.bytes_saved += other.bytes_saved;
        self.failures += other.failures;
        self
    }
}

fn is_supported(path: &Path) -> bool {
    path.to_str()
        .and_then(paths::extension)
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Recompress every supported image under `root/assets/images/`.
///
/// Per-file failures are logged and counted; the file stays as it was.
pub fn optimize_images(root: &Path, codec: &dyn ImageCodec) -> ImageStats {
    let dir = root.join(AssetClass::Image.canonical_dir());
    let mut files: Vec<PathBuf> = WalkDir::new(&dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_supported(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();

    files
        .par_iter()
        .map(|path| match codec.recompress(path) {
            Ok(r) => {
                if r.changed {
                    debug!(file = %path.display(), saved = r.saved(), "recompressed image");
                }
                ImageStats {
                    files: 1,
                    optimized: usize::from(r.changed),
                    bytes_saved: r.saved(),
                    failures: 0,
                }
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "image optimization failed");
                ImageStats {
                    files: 1,
                    failures: 1,
                    ..ImageStats::default()
                }
            }
        })
        .reduce(ImageStats::default, ImageStats::merge)
}

#[cfg(test)]
mod tests {
    use super::backend::tests::MockCodec;
    use super::*;
    use crate::test_helpers::write_tree;
    use tempfile::TempDir;

    #[test]
    fn optimizes_only_supported_images_under_assets() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("assets/images/a.jpg", "0123456789"),
                ("assets/images/sub/b.PNG", "0123456789"),
                ("assets/images/c.svg", "<svg/>"),
                ("assets/images/d.gif", "GIF89a"),
                ("photo.jpg", "0123456789"),
            ],
        );
        let codec = MockCodec::new(4);
        let stats = optimize_images(tmp.path(), &codec);

        assert_eq!(codec.get_calls(), vec!["a.jpg".to_string(), "b.PNG".to_string()]);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.optimized, 2);
        assert_eq!(stats.bytes_saved, 8);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn failures_are_counted_not_fatal() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[("assets/images/bad.jpg", "x"), ("assets/images/good.webp", "y")],
        );
        let codec = MockCodec::failing_on("bad.jpg");
        let stats = optimize_images(tmp.path(), &codec);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.optimized, 0);
    }

    #[test]
    fn missing_image_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(optimize_images(tmp.path(), &MockCodec::new(1)), ImageStats::default());
    }
}
