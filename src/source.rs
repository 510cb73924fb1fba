//! Donor discovery and output preparation.
//!
//! The donor is the raw crawl dump: some directory tree, usually nesting the
//! real site a few levels deep (`dump/web/2021/site.example/`). Preparing the
//! output means:
//!
//! 1. Copy the donor into a fresh output directory. The donor is never
//!    modified.
//! 2. Find the **domain root**: the shallowest directory holding an
//!    `index.html` / `index.htm`, ties broken by the number of pages it holds.
//! 3. Merge the domain root into the output root under the conflict policy and
//!    remove the shells left empty by the move.
//!
//! Everything that can be decided before touching the filesystem (which donor,
//! does the output overlap it) is a fatal [`SourceError`].

use crate::paths;
use crate::relocate::{ConflictPolicy, Placement, place_file};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("source directory {0} does not exist")]
    Missing(PathBuf),
    #[error("expected exactly one source directory, found {}: [{}]", .0.len(), .0.join(", "))]
    Ambiguous(Vec<String>),
    #[error("output {} overlaps source {}", .output.display(), .donor.display())]
    Overlap { donor: PathBuf, output: PathBuf },
}

/// Pick the donor directory.
///
/// An explicit path wins. Otherwise `cwd` must contain exactly one directory
/// that is not hidden and not one of `exclude` (the output and temp dirs).
pub fn locate_donor(
    cwd: &Path,
    explicit: Option<&Path>,
    exclude: &[&Path],
) -> Result<PathBuf, SourceError> {
    if let Some(path) = explicit {
        let path = cwd.join(path);
        if !path.is_dir() {
            return Err(SourceError::Missing(path));
        }
        return Ok(path);
    }

    let excluded: Vec<PathBuf> = exclude.iter().map(|p| absolute(&cwd.join(p))).collect();
    let mut candidates: Vec<PathBuf> = fs::read_dir(cwd)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path())
        .filter(|p| !excluded.contains(&absolute(p)))
        .collect();
    candidates.sort();

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        _ => Err(SourceError::Ambiguous(
            candidates
                .iter()
                .map(|p| p.file_name().unwrap_or_default().to_string_lossy().into_owned())
                .collect(),
        )),
    }
}

/// Absolute form of `path`, following symlinks as far as the path exists.
fn absolute(path: &Path) -> PathBuf {
    if let Ok(p) = fs::canonicalize(path) {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => absolute(parent).join(name),
        _ => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// Fail if either of `source` and `output` contains the other.
pub fn check_overlap(source: &Path, output: &Path) -> Result<(), SourceError> {
    let (s, o) = (absolute(source), absolute(output));
    if s.starts_with(&o) || o.starts_with(&s) {
        return Err(SourceError::Overlap {
            donor: s,
            output: o,
        });
    }
    Ok(())
}

fn is_index_name(name: &str) -> bool {
    name.eq_ignore_ascii_case("index.html") || name.eq_ignore_ascii_case("index.htm")
}

fn is_page_name(name: &str) -> bool {
    matches!(paths::extension(name).as_deref(), Some("html" | "htm"))
}

/// Shallowest directory under `root` (inclusive) holding an index page.
///
/// Among directories at the same depth the one with the most pages wins, then
/// the lexicographically smallest path.
pub fn find_domain_root(root: &Path) -> Option<PathBuf> {
    let mut best: Option<(usize, std::cmp::Reverse<usize>, PathBuf)> = None;
    for entry in WalkDir::new(root).sort_by_file_name() {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_dir() {
            continue;
        }
        let Ok(listing) = fs::read_dir(entry.path()) else {
            continue;
        };
        let names: Vec<String> = listing
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        if !names.iter().any(|n| is_index_name(n)) {
            continue;
        }
        let pages = names.iter().filter(|n| is_page_name(n)).count();
        let key = (entry.depth(), std::cmp::Reverse(pages), entry.path().to_path_buf());
        if best.as_ref().is_none_or(|b| key < *b) {
            best = Some(key);
        }
    }
    best.map(|(_, _, path)| path)
}

/// Counters for the domain-root merge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeStats {
    pub moved: usize,
    pub duplicates: usize,
    pub conflicts: usize,
    pub failures: usize,
}

/// Result of [`prepare`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PrepareReport {
    pub source: PathBuf,
    pub files_copied: usize,
    /// Domain root relative to the output, if it was not the output itself.
    pub domain_root: Option<String>,
    pub merge: MergeStats,
    pub shells_removed: usize,
}

/// Recreate `output` as a copy of `source` and flatten its domain root.
pub fn prepare(
    source: &Path,
    output: &Path,
    policy: ConflictPolicy,
) -> Result<PrepareReport, SourceError> {
    if !source.is_dir() {
        return Err(SourceError::Missing(source.to_path_buf()));
    }
    check_overlap(source, output)?;

    if output.exists() {
        fs::remove_dir_all(output)?;
    }
    let files_copied = copy_tree(source, output)?;
    info!(source = %source.display(), output = %output.display(), files = files_copied, "copied donor");

    let mut report = PrepareReport {
        source: source.to_path_buf(),
        files_copied,
        ..PrepareReport::default()
    };

    let Some(domain_root) = find_domain_root(output) else {
        warn!("no directory with an index page found, leaving the layout as is");
        return Ok(report);
    };
    if domain_root == output {
        return Ok(report);
    }

    let rel = paths::rel_to_root(output, &domain_root).unwrap_or_default();
    info!(domain_root = %rel, "flattening domain root");
    report.merge = merge_into(&domain_root, output, policy);
    report.shells_removed = remove_empty_shells(&domain_root, output);
    report.domain_root = Some(rel);
    Ok(report)
}

fn copy_tree(source: &Path, dest: &Path) -> io::Result<usize> {
    let mut files = 0;
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let Ok(rel) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
            files += 1;
        }
    }
    Ok(files)
}

/// Move every file under `from` to the same relative place under `to`.
fn merge_into(from: &Path, to: &Path, policy: ConflictPolicy) -> MergeStats {
    let files: Vec<PathBuf> = WalkDir::new(from)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    let mut stats = MergeStats::default();
    for src in files {
        let Ok(rel) = src.strip_prefix(from) else {
            continue;
        };
        match place_file(&src, &to.join(rel), policy) {
            Ok(Placement::Moved(_)) => stats.moved += 1,
            Ok(Placement::DuplicateDropped(_)) => stats.duplicates += 1,
            Ok(_) => stats.conflicts += 1,
            Err(e) => {
                warn!(file = %src.display(), error = %e, "could not merge file");
                stats.failures += 1;
            }
        }
    }
    stats
}

/// Remove empty directories under `dir`, then `dir` and its ancestors up to
/// (excluding) `stop` while they are empty.
fn remove_empty_shells(dir: &Path, stop: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(dir)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.depth() > 0)
    {
        if fs::remove_dir(entry.path()).is_ok() {
            removed += 1;
        }
    }

    let mut current = Some(dir);
    while let Some(d) = current {
        if d == stop || !d.starts_with(stop) || fs::remove_dir(d).is_err() {
            break;
        }
        debug!(dir = %d.display(), "removed empty shell");
        removed += 1;
        current = d.parent();
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{list_files, read, write_tree};
    use tempfile::TempDir;

    // =========================================================================
    // locate_donor
    // =========================================================================

    #[test]
    fn single_candidate_is_the_donor() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("dump")).unwrap();
        fs::create_dir_all(tmp.path().join("site")).unwrap();
        fs::create_dir_all(tmp.path().join(".rehydrate-temp")).unwrap();
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let donor = locate_donor(tmp.path(), None, &[Path::new("site")]).unwrap();
        assert_eq!(donor, tmp.path().join("dump"));
    }

    #[test]
    fn ambiguous_or_missing_donor_is_fatal() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            locate_donor(tmp.path(), None, &[]),
            Err(SourceError::Ambiguous(found)) if found.is_empty()
        ));

        fs::create_dir_all(tmp.path().join("a")).unwrap();
        fs::create_dir_all(tmp.path().join("b")).unwrap();
        let err = locate_donor(tmp.path(), None, &[]).unwrap_err();
        assert!(err.to_string().contains("found 2: [a, b]"));
    }

    #[test]
    fn explicit_donor_must_exist() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a")).unwrap();
        fs::create_dir_all(tmp.path().join("b")).unwrap();
        assert_eq!(
            locate_donor(tmp.path(), Some(Path::new("b")), &[]).unwrap(),
            tmp.path().join("b")
        );
        assert!(matches!(
            locate_donor(tmp.path(), Some(Path::new("c")), &[]),
            Err(SourceError::Missing(_))
        ));
    }

    #[test]
    fn overlap_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let donor = tmp.path().join("dump");
        fs::create_dir_all(&donor).unwrap();
        assert!(check_overlap(&donor, &donor.join("site")).is_err());
        assert!(check_overlap(&donor, tmp.path()).is_err());
        assert!(check_overlap(&donor, &tmp.path().join("site")).is_ok());
    }

    // =========================================================================
    // find_domain_root
    // =========================================================================

    #[test]
    fn root_with_index_is_its_own_domain_root() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("INDEX.HTML", ""), ("deep/index.html", "")]);
        assert_eq!(find_domain_root(tmp.path()).unwrap(), tmp.path());
    }

    #[test]
    fn shallowest_then_most_pages_wins() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("web/a/index.html", ""),
                ("web/b/index.htm", ""),
                ("web/b/about.html", ""),
                ("web/b/deeper/x/index.html", ""),
                ("web/b/deeper/x/1.html", ""),
                ("web/b/deeper/x/2.html", ""),
            ],
        );
        assert_eq!(find_domain_root(tmp.path()).unwrap(), tmp.path().join("web/b"));
    }

    #[test]
    fn no_index_anywhere() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("a/page.html", "")]);
        assert_eq!(find_domain_root(tmp.path()), None);
    }

    // =========================================================================
    // prepare
    // =========================================================================

    #[test]
    fn prepare_copies_and_flattens() {
        let tmp = TempDir::new().unwrap();
        let donor = tmp.path().join("dump");
        let output = tmp.path().join("site");
        write_tree(
            &donor,
            &[
                ("web/2021/site.example/index.html", "home"),
                ("web/2021/site.example/blog/post.html", "post"),
                ("web/2021/site.example/style.css", "a{}"),
                ("web/2021/robots.txt", "old"),
            ],
        );
        write_tree(&output, &[("stale.html", "stale")]);

        let report = prepare(&donor, &output, ConflictPolicy::KeepDestination).unwrap();

        assert_eq!(report.files_copied, 4);
        assert_eq!(report.domain_root.as_deref(), Some("web/2021/site.example"));
        assert_eq!(report.merge.moved, 3);
        assert_eq!(
            list_files(&output),
            ["blog/post.html", "index.html", "style.css", "web/2021/robots.txt"]
        );
        assert_eq!(read(&output, "index.html"), "home");
        assert!(!output.join("web/2021/site.example").exists());
        // donor untouched
        assert_eq!(list_files(&donor).len(), 4);
    }

    #[test]
    fn prepare_merge_conflict_keeps_destination() {
        let tmp = TempDir::new().unwrap();
        let donor = tmp.path().join("dump");
        let output = tmp.path().join("site");
        write_tree(
            &donor,
            &[
                ("readme.txt", "outer"),
                ("host/index.html", "home"),
                ("host/readme.txt", "inner"),
            ],
        );

        let report = prepare(&donor, &output, ConflictPolicy::KeepDestination).unwrap();
        assert_eq!(report.merge.conflicts, 1);
        assert_eq!(read(&output, "readme.txt"), "outer");
        assert_eq!(read(&output, "host/readme.txt"), "inner");
        assert_eq!(read(&output, "index.html"), "home");
    }

    #[test]
    fn prepare_refuses_output_inside_donor() {
        let tmp = TempDir::new().unwrap();
        let donor = tmp.path().join("dump");
        write_tree(&donor, &[("index.html", "")]);
        let result = prepare(&donor, &donor.join("site"), ConflictPolicy::KeepDestination);
        assert!(matches!(result, Err(SourceError::Overlap { .. })));
        assert!(!donor.join("site").exists());
    }
}
