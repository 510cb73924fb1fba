//! Removal of archive scaffolding from rewritten pages.
//!
//! Captured pages carry the playback machinery that was injected around them:
//! the toolbar block, `wombat.js` and friends, banner stylesheets, and comments
//! stamped by the crawler. None of it works offline and all of it points back
//! at the archive, so it goes.
//!
//! Runs on the same [`Document`] as the link rewriter so each page is parsed and
//! written once.

use crate::markup::{Document, ElementId, Tag};
use std::ops::Range;
use tracing::debug;

const TOOLBAR_BEGIN: &str = "BEGIN WAYBACK TOOLBAR INSERT";
const TOOLBAR_END: &str = "END WAYBACK TOOLBAR INSERT";

/// Substrings of `script src` / `link href` values that mark archive assets.
const TRASH_URL_PATTERNS: &[&str] = &[
    "web-static.archive.org",
    "archive.org",
    "/_static/",
    "/__wb/",
    "wombat.js",
    "bundle-playback.js",
    "athena.js",
    "ruffle.js",
    "banner-styles.css",
    "iconochive.css",
    "gmpg.org/xfn",
];

/// Substrings of inline script bodies that only playback code contains.
const INLINE_MARKERS: &[&str] = &[
    "__wm.",
    "_wb_wombat",
    "wombat.js",
    "window.ruffleplayer",
    "athena.js",
    "bundle-playback.js",
];

/// Substrings of comments left behind by the archive.
const COMMENT_MARKERS: &[&str] = &["wayback", "archive.org", "web-static.archive.org"];

/// Never removed, whatever they contain.
const PROTECTED_URL_PATTERNS: &[&str] = &["wp-json"];

#[derive(Debug, Clone)]
pub struct ScrubSettings {
    /// Extra hosts whose assets count as archive scaffolding.
    pub archive_hosts: Vec<String>,
}

impl Default for ScrubSettings {
    fn default() -> Self {
        Self {
            archive_hosts: vec!["web.archive.org".to_string()],
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScrubStats {
    pub toolbars: usize,
    pub elements: usize,
    pub comments: usize,
}

impl ScrubStats {
    pub fn total(&self) -> usize {
        self.toolbars + self.elements + self.comments
    }

    pub fn add(&mut self, other: &ScrubStats) {
        self.toolbars += other.toolbars;
        self.elements += other.elements;
        self.comments += other.comments;
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_ascii_lowercase();
    needles.iter().any(|n| lower.contains(&n.to_ascii_lowercase()))
}

fn inside(outer: &[Range<usize>], span: &Range<usize>) -> bool {
    outer
        .iter()
        .any(|r| r.start <= span.start && span.end <= r.end)
}

/// Queue removal of every piece of archive scaffolding in `doc`.
pub fn scrub(doc: &mut Document, settings: &ScrubSettings) -> ScrubStats {
    let mut stats = ScrubStats::default();

    let toolbars = toolbar_regions(doc);
    for region in &toolbars {
        doc.remove_range(region.clone());
        stats.toolbars += 1;
    }

    let trash: Vec<ElementId> = doc
        .element_ids()
        .filter(|id| !inside(&toolbars, &doc.element(*id).span()))
        .filter(|id| is_trash_element(doc, *id, settings))
        .collect();
    for id in trash {
        debug!(element = doc.element(id).name(), "removing archive element");
        doc.remove_element(id);
        stats.elements += 1;
    }

    let comments: Vec<Range<usize>> = doc
        .comments()
        .iter()
        .filter(|c| !inside(&toolbars, &c.span))
        .filter(|c| contains_any(doc.text(c.body.clone()), COMMENT_MARKERS))
        .map(|c| c.span.clone())
        .collect();
    for span in comments {
        doc.remove_range(span);
        stats.comments += 1;
    }
    stats
}

/// Spans from a toolbar BEGIN comment through the matching END comment.
fn toolbar_regions(doc: &Document) -> Vec<Range<usize>> {
    let mut regions = Vec::new();
    let mut begin: Option<usize> = None;
    for comment in doc.comments() {
        let body = doc.text(comment.body.clone());
        if body.contains(TOOLBAR_BEGIN) {
            begin = Some(comment.span.start);
        } else if body.contains(TOOLBAR_END)
            && let Some(start) = begin.take()
        {
            regions.push(start..comment.span.end);
        }
    }
    regions
}

fn is_trash_element(doc: &Document, id: ElementId, settings: &ScrubSettings) -> bool {
    let tag = doc.element(id).tag();
    let url = match tag {
        Tag::Script => doc.attr(id, "src"),
        Tag::Link => doc.attr(id, "href"),
        _ => return false,
    };

    if let Some(url) = url.filter(|u| !u.is_empty()) {
        if contains_any(&url, PROTECTED_URL_PATTERNS) {
            return false;
        }
        let hosts: Vec<&str> = settings.archive_hosts.iter().map(String::as_str).collect();
        return contains_any(&url, TRASH_URL_PATTERNS) || contains_any(&url, &hosts);
    }

    if tag != Tag::Script {
        return false;
    }
    let is_json = doc
        .attr(id, "type")
        .is_some_and(|t| t.to_ascii_lowercase().contains("json"));
    !is_json && doc.content(id).is_some_and(|body| contains_any(body, INLINE_MARKERS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::Flavor;

    fn run(src: &str) -> (String, ScrubStats) {
        let mut doc = Document::parse(src.to_string(), Flavor::Html).unwrap();
        let stats = scrub(&mut doc, &ScrubSettings::default());
        (doc.render(), stats)
    }

    #[test]
    fn removes_toolbar_region() {
        let (out, stats) = run(
            "<body><!-- BEGIN WAYBACK TOOLBAR INSERT --><div id=wm-ipp><script>__wm.bt()</script></div><!-- END WAYBACK TOOLBAR INSERT --><h1>Hi</h1></body>",
        );
        assert_eq!(out, "<body><h1>Hi</h1></body>");
        assert_eq!(stats.toolbars, 1);
        assert_eq!(stats.elements, 0);
    }

    #[test]
    fn removes_playback_scripts_and_styles() {
        let (out, stats) = run(concat!(
            "<head>",
            "<script src=\"https://web-static.archive.org/_static/js/bundle-playback.js?v=1\"></script>",
            "<script type=\"text/javascript\" src=\"/_static/js/wombat.js\"></script>",
            "<link rel=\"stylesheet\" href=\"https://web-static.archive.org/_static/css/banner-styles.css\">",
            "<link rel=\"stylesheet\" href=\"assets/css/site.css\">",
            "<script src=\"assets/js/site.js\"></script>",
            "</head>"
        ));
        assert_eq!(
            out,
            "<head><link rel=\"stylesheet\" href=\"assets/css/site.css\"><script src=\"assets/js/site.js\"></script></head>"
        );
        assert_eq!(stats.elements, 3);
    }

    #[test]
    fn removes_inline_playback_but_keeps_json() {
        let (out, _) = run(concat!(
            "<script>__wm.init(\"https://web.archive.org/web\");</script>",
            "<script type=\"application/ld+json\">{\"@id\":\"__wm.x\"}</script>",
            "<script>var site = 1;</script>"
        ));
        assert_eq!(
            out,
            "<script type=\"application/ld+json\">{\"@id\":\"__wm.x\"}</script><script>var site = 1;</script>"
        );
    }

    #[test]
    fn keeps_wp_json_links() {
        let (out, stats) = run(
            "<link rel=\"https://api.w.org/\" href=\"https://web.archive.org/web/2020/https://site.example/wp-json/\">",
        );
        assert_eq!(stats.elements, 0);
        assert!(out.contains("wp-json"));
    }

    #[test]
    fn removes_archive_comments_only() {
        let (out, stats) = run(
            "<p>a</p><!--\n     FILE ARCHIVED ON 10:00:00 Jan 01, 2020 AND RETRIEVED FROM THE\n     INTERNET ARCHIVE ON ... (Wayback Machine)\n--><!-- keep --><!--[if IE]>x<![endif]-->",
        );
        assert_eq!(out, "<p>a</p><!-- keep --><!--[if IE]>x<![endif]-->");
        assert_eq!(stats.comments, 1);
    }

    #[test]
    fn clean_page_is_untouched() {
        let src = "<!doctype html><html><head><title>t</title><meta charset=utf-8></head><body><a href=/x>x</a></body></html>";
        let mut doc = Document::parse(src.to_string(), Flavor::Html).unwrap();
        let stats = scrub(&mut doc, &ScrubSettings::default());
        assert_eq!(stats.total(), 0);
        assert!(!doc.is_modified());
    }
}
