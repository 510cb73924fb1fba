//! Shared test utilities for the rehydrate test suite.
//!
//! Fixtures are tiny archive dumps written straight into a temp directory, so
//! every test reads like the tree it works on.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! write_tree(tmp.path(), &[
//!     ("index.html", "<a href=\"about\">About</a>"),
//!     ("about/index.html", "<h1>About</h1>"),
//! ]);
//! assert_eq!(list_files(tmp.path()), ["about/index.html", "index.html"]);
//! ```

use std::fs;
use std::path::Path;
use walkdir::WalkDir;

// =========================================================================
// Fixture setup
// =========================================================================

/// Write `(relative path, contents)` pairs under `root`, creating directories.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, contents) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
    }
}

// =========================================================================
// Tree inspection
// =========================================================================

/// Every regular file under `root` as a sorted list of slash-separated paths.
pub fn list_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| crate::paths::rel_to_root(root, e.path()))
        .collect();
    files.sort();
    files
}

/// Read a file under `root` as UTF-8. Panics with the path on failure.
pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap_or_else(|e| panic!("reading {rel}: {e}"))
}
