//! Moving files into place under a conflict policy.
//!
//! Both the donor flattening (domain root → site root) and the asset
//! consolidator (anywhere → `assets/<class>/`) end up asking the same question:
//! "put this file at that path, but what if something is already there?" The answer
//! is always the same sequence:
//!
//! 1. Destination free → move.
//! 2. Destination holds identical bytes → drop the source, nothing is lost.
//! 3. Otherwise apply the run's [`ConflictPolicy`].

use crate::digest;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What to do when a file lands on an existing, different file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Leave the destination alone; the source stays where it was.
    #[default]
    KeepDestination,
    /// Replace the destination with the source.
    Overwrite,
    /// Move the source next to the destination as `name (k).ext`.
    Rename,
}

/// Where a file ended up after [`place_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Moved to the requested destination.
    Moved(PathBuf),
    /// Destination already had the same bytes; the source was deleted.
    DuplicateDropped(PathBuf),
    /// Conflict under [`ConflictPolicy::KeepDestination`]; source untouched.
    Kept(PathBuf),
    /// Conflict under [`ConflictPolicy::Overwrite`].
    Overwrote(PathBuf),
    /// Conflict under [`ConflictPolicy::Rename`]; the new path is returned.
    Renamed(PathBuf),
}

/// Move `src` to `dst`, resolving conflicts according to `policy`.
///
/// Parent directories of `dst` are created as needed. A rename that fails
/// because source and destination live on different filesystems falls back to
/// copy + delete.
pub fn place_file(src: &Path, dst: &Path, policy: ConflictPolicy) -> io::Result<Placement> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    if !dst.exists() {
        move_file(src, dst)?;
        return Ok(Placement::Moved(dst.to_path_buf()));
    }

    match digest::same_content(src, dst) {
        Ok(true) => {
            fs::remove_file(src)?;
            debug!(source = %src.display(), dest = %dst.display(), "duplicate dropped");
            return Ok(Placement::DuplicateDropped(dst.to_path_buf()));
        }
        Ok(false) => {}
        Err(e) => {
            warn!(source = %src.display(), dest = %dst.display(), error = %e, "could not compare digests; treating as a conflict");
        }
    }

    match policy {
        ConflictPolicy::KeepDestination => {
            warn!(source = %src.display(), dest = %dst.display(), "name conflict, keeping destination");
            Ok(Placement::Kept(src.to_path_buf()))
        }
        ConflictPolicy::Overwrite => {
            warn!(source = %src.display(), dest = %dst.display(), "name conflict, overwriting destination");
            move_file(src, dst)?;
            Ok(Placement::Overwrote(dst.to_path_buf()))
        }
        ConflictPolicy::Rename => {
            let target = free_sibling(dst);
            warn!(source = %src.display(), dest = %target.display(), "name conflict, saved under a new name");
            move_file(src, &target)?;
            Ok(Placement::Renamed(target))
        }
    }
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
    }
}

/// First `name (k).ext` next to `path` that does not exist yet, k starting at 1.
fn free_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    (1..)
        .map(|k| parent.join(format!("{stem} ({k}){ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}
