//! Removal of server-side leftovers and empty directories.
//!
//! A crawl saves whatever the server answered: PHP endpoints rendered to
//! nothing, `wp-json` API responses, analytics beacons. None of it is part of a
//! static site. Runs after consolidation, so resources that lived under
//! `wp-content/` have already been moved to `assets/` and survive.
//!
//! `assets/` itself is never pruned.

use crate::assets::is_canonical_asset_path;
use crate::config::PruneConfig;
use crate::paths;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    pub dirs: usize,
    pub files: usize,
    pub empty_dirs: usize,
    pub failures: usize,
}

fn normalized(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .collect()
}

/// Delete trash directories, trash files and then empty directories under
/// `root`, outside `assets/`.
pub fn prune(root: &Path, config: &PruneConfig) -> PruneStats {
    let trash_dirs = normalized(&config.trash_dirs);
    let trash_exts = normalized(&config.trash_extensions);
    let mut stats = PruneStats::default();

    let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "could not read directory entry");
                stats.failures += 1;
                continue;
            }
        };
        let Some(rel) = paths::rel_to_root(root, entry.path()) else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().to_lowercase();

        if entry.file_type().is_dir() {
            if is_canonical_asset_path(&rel) {
                walker.skip_current_dir();
            } else if trash_dirs.contains(&name) {
                walker.skip_current_dir();
                match fs::remove_dir_all(entry.path()) {
                    Ok(()) => {
                        debug!(dir = %rel, "removed trash directory");
                        stats.dirs += 1;
                    }
                    Err(e) => {
                        warn!(dir = %rel, error = %e, "could not remove trash directory");
                        stats.failures += 1;
                    }
                }
            }
        } else if paths::extension(&name).is_some_and(|ext| trash_exts.contains(&ext)) {
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!(file = %rel, "removed trash file");
                    stats.files += 1;
                }
                Err(e) => {
                    warn!(file = %rel, error = %e, "could not remove trash file");
                    stats.failures += 1;
                }
            }
        }
    }

    remove_empty_dirs(root, &mut stats);
    info!(
        dirs = stats.dirs,
        files = stats.files,
        empty_dirs = stats.empty_dirs,
        "pruned"
    );
    stats
}

/// Bottom-up, so a directory emptied by removing its children goes too.
fn remove_empty_dirs(root: &Path, stats: &mut PruneStats) {
    let dirs = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir());
    for entry in dirs {
        let Some(rel) = paths::rel_to_root(root, entry.path()) else {
            continue;
        };
        if is_canonical_asset_path(&rel) {
            continue;
        }
        let is_empty = fs::read_dir(entry.path()).is_ok_and(|mut d| d.next().is_none());
        if !is_empty {
            continue;
        }
        match fs::remove_dir(entry.path()) {
            Ok(()) => stats.empty_dirs += 1,
            Err(e) => {
                warn!(dir = %rel, error = %e, "could not remove empty directory");
                stats.failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{list_files, write_tree};
    use tempfile::TempDir;

    #[test]
    fn removes_trash_and_empty_dirs() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("index.html", ""),
                ("wp-json/wp/v2/posts.json", "[]"),
                ("blog/WP-Content/themes/x/readme.txt", ""),
                ("xmlrpc.php", ""),
                ("contact/send.ASP", ""),
                ("contact/index.html", ""),
                ("assets/js/analytics/tracker.js", ""),
            ],
        );
        fs::create_dir_all(tmp.path().join("empty/nested")).unwrap();
        fs::create_dir_all(tmp.path().join("assets/fonts")).unwrap();

        let stats = prune(tmp.path(), &PruneConfig::default());

        assert_eq!(
            list_files(tmp.path()),
            ["assets/js/analytics/tracker.js", "contact/index.html", "index.html"]
        );
        assert_eq!(stats.dirs, 2);
        assert_eq!(stats.files, 2);
        // blog (emptied), empty/nested, empty
        assert_eq!(stats.empty_dirs, 3);
        assert!(tmp.path().join("assets/fonts").is_dir());
        assert!(!tmp.path().join("blog").exists());
    }

    #[test]
    fn configured_extensions_accept_leading_dot() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("a.cgi", ""), ("b.html", "")]);
        let config = PruneConfig {
            trash_dirs: vec![],
            trash_extensions: vec![".CGI".to_string()],
        };
        let stats = prune(tmp.path(), &config);
        assert_eq!(stats.files, 1);
        assert_eq!(list_files(tmp.path()), ["b.html"]);
    }
}
