//! File Index: the set of files that exist in the output tree.
//!
//! Built once after consolidation and pruning, then frozen and shared by
//! reference with every rewriting task. The resolver asks it "does this path
//! exist?", "does it exist ignoring case?" when the archive lost the original
//! casing, and "which page serves this directory?" for route-style links.

use crate::paths;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Extensions of files parsed as markup by the rewriter.
pub const MARKUP_EXTENSIONS: &[&str] = &["html", "htm", "xhtml", "xml"];

/// Extensions of the pages listed in the sitemap.
pub const PAGE_EXTENSIONS: &[&str] = &["html", "htm", "xhtml"];

/// File names that make a directory a page, in order of preference.
pub const INDEX_FILES: &[&str] = &["index.html", "index.htm"];

#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    paths: BTreeSet<String>,
    /// Directories holding an index page. The root is `""`.
    index_dirs: BTreeSet<String>,
    /// Case-folded path → first real path with that folding.
    folded: HashMap<String, String>,
    /// Case-folded index directory → real directory.
    folded_dirs: HashMap<String, String>,
}

impl FileIndex {
    /// Walk `root` and record every regular file.
    pub fn build(root: &Path) -> Self {
        let mut index = Self::default();
        for entry in WalkDir::new(root) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry while indexing");
                    continue;
                }
            };
            if entry.file_type().is_file()
                && let Some(rel) = paths::rel_to_root(root, entry.path())
            {
                index.insert(rel);
            }
        }
        index
    }

    /// Index from an explicit list of site-relative paths.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = Self::default();
        for p in paths {
            index.insert(p.into());
        }
        index
    }

    fn insert(&mut self, rel: String) {
        if is_index_name(paths::basename(&rel)) {
            let dir = paths::parent_dir(&rel).to_string();
            self.folded_dirs
                .entry(dir.to_lowercase())
                .or_insert_with(|| dir.clone());
            self.index_dirs.insert(dir);
        }
        self.folded
            .entry(rel.to_lowercase())
            .or_insert_with(|| rel.clone());
        self.paths.insert(rel);
    }

    pub fn contains(&self, rel: &str) -> bool {
        self.paths.contains(rel)
    }

    /// Exact match only. Returns the stored path.
    pub fn get(&self, rel: &str) -> Option<&str> {
        self.paths.get(rel).map(String::as_str)
    }

    /// Exact match first, then a case-insensitive match. Returns the real path.
    pub fn find(&self, rel: &str) -> Option<&str> {
        if let Some(p) = self.paths.get(rel) {
            return Some(p.as_str());
        }
        self.folded.get(&rel.to_lowercase()).map(String::as_str)
    }

    pub fn is_index_dir(&self, dir: &str) -> bool {
        self.index_dirs.contains(dir)
    }

    /// Index page serving `dir` (`""` is the root). The directory may differ
    /// in case; `index.html` wins over `index.htm`.
    pub fn index_page(&self, dir: &str) -> Option<&str> {
        let dir = match self.index_dirs.get(dir) {
            Some(d) => d.as_str(),
            None => self.folded_dirs.get(&dir.to_lowercase())?.as_str(),
        };
        INDEX_FILES
            .iter()
            .find_map(|name| self.find(&paths::join(dir, name)))
    }

    /// Whether `rel` is the index page of its directory.
    pub fn is_index_page(&self, rel: &str) -> bool {
        is_index_name(paths::basename(rel)) && self.is_index_dir(paths::parent_dir(rel))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// Markup documents (`.html`, `.htm`, `.xhtml`, `.xml`) in path order.
    pub fn markup_files(&self) -> impl Iterator<Item = &str> {
        self.iter().filter(|p| is_markup(p))
    }

    /// Stylesheets in path order.
    pub fn stylesheet_files(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|p| paths::extension(p).as_deref() == Some("css"))
    }
}

fn is_index_name(name: &str) -> bool {
    INDEX_FILES.iter().any(|f| name.eq_ignore_ascii_case(f))
}

/// Whether a path names a markup document.
pub fn is_markup(rel: &str) -> bool {
    paths::extension(rel).is_some_and(|ext| MARKUP_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether a path names an HTML page that belongs in the sitemap.
pub fn is_page(rel: &str) -> bool {
    paths::extension(rel).is_some_and(|ext| PAGE_EXTENSIONS.contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_tree;
    use tempfile::TempDir;

    #[test]
    fn build_records_files_only() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("index.html", ""),
                ("blog/post/index.html", ""),
                ("assets/css/main.css", ""),
            ],
        );
        std::fs::create_dir_all(tmp.path().join("empty")).unwrap();

        let index = FileIndex::build(tmp.path());
        assert_eq!(index.len(), 3);
        assert!(index.contains("blog/post/index.html"));
        assert!(!index.contains("blog/post"));
        assert!(!index.contains("empty"));
    }

    #[test]
    fn find_falls_back_to_case_insensitive() {
        let index = FileIndex::from_paths(["About/Team.html", "about.html"]);
        assert_eq!(index.find("about.html"), Some("about.html"));
        assert_eq!(index.find("about/team.html"), Some("About/Team.html"));
        assert_eq!(index.find("missing.html"), None);
    }

    #[test]
    fn index_dirs_record_directories_with_an_index_page() {
        let index = FileIndex::from_paths([
            "index.html",
            "blog/Index.HTM",
            "blog/post.html",
            "docs/guide.html",
            "Shop/index.html",
        ]);
        assert!(index.is_index_dir(""));
        assert!(index.is_index_dir("blog"));
        assert!(!index.is_index_dir("docs"));

        assert_eq!(index.index_page(""), Some("index.html"));
        assert_eq!(index.index_page("blog"), Some("blog/Index.HTM"));
        assert_eq!(index.index_page("shop"), Some("Shop/index.html"));
        assert_eq!(index.index_page("docs"), None);

        assert!(index.is_index_page("blog/Index.HTM"));
        assert!(!index.is_index_page("blog/post.html"));
    }

    #[test]
    fn index_html_is_preferred_over_index_htm() {
        let index = FileIndex::from_paths(["a/index.htm", "a/index.html"]);
        assert_eq!(index.index_page("a"), Some("a/index.html"));
    }

    #[test]
    fn markup_and_stylesheet_filters() {
        let index = FileIndex::from_paths([
            "index.html",
            "feed.xml",
            "page.xhtml",
            "assets/css/a.css",
            "assets/js/a.js",
        ]);
        let markup: Vec<&str> = index.markup_files().collect();
        assert_eq!(markup, ["feed.xml", "index.html", "page.xhtml"]);
        let css: Vec<&str> = index.stylesheet_files().collect();
        assert_eq!(css, ["assets/css/a.css"]);
    }

    #[test]
    fn pages_exclude_xml_feeds() {
        assert!(is_page("a/index.htm"));
        assert!(!is_page("feed.xml"));
        assert!(is_markup("feed.xml"));
    }
}
