//! Rewriting stage: every markup page and stylesheet in the output tree gets its
//! references resolved and, for pages, the archive scaffolding scrubbed.
//!
//! The Resource Table and File Index are built before this stage starts and only
//! borrowed here, so files are processed in parallel; each task reads, edits and
//! writes only its own file.
//!
//! ## Markup
//!
//! For each element the URL-bearing attributes are selected by tag
//! ([`url_attrs`]), `srcset`-style values are resolved per candidate, and
//! `url(...)` inside `style` attributes and `<style>` elements goes through the
//! stylesheet rewriter below.
//!
//! ## Stylesheets
//!
//! `url(...)` in any of its three quotings and `@import "..."` are rewritten in
//! place; the original quote characters are kept.

use crate::index::FileIndex;
use crate::markup::{Document, Flavor, MarkupError, Tag, url_attrs};
use crate::resolve::Resolver;
use crate::scrub::{self, ScrubSettings, ScrubStats};
use rayon::prelude::*;
use regex::{Captures, Regex};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a single file was left untouched.
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("unparseable markup: {0}")]
    Markup(#[from] MarkupError),
}

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"]*?))\s*\)"#).expect("valid regex")
});

static CSS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@import\s+(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

/// Rewrite the references of a stylesheet (or a `style` attribute) found in
/// `rel`. Returns the new text and the number of references changed.
pub fn rewrite_stylesheet(css: &str, rel: &str, resolver: &Resolver<'_>) -> (String, usize) {
    let mut count = 0;

    let after_imports = CSS_IMPORT.replace_all(css, |caps: &Captures| {
        let (quote, value) = quoted_group(caps);
        match resolver.rewrite(value, rel) {
            Some(new) => {
                count += 1;
                format!("@import {quote}{new}{quote}")
            }
            None => caps[0].to_string(),
        }
    });

    let out = CSS_URL.replace_all(&after_imports, |caps: &Captures| {
        let (quote, value) = quoted_group(caps);
        match resolver.rewrite(value.trim(), rel) {
            Some(new) => {
                count += 1;
                format!("url({quote}{new}{quote})")
            }
            None => caps[0].to_string(),
        }
    });

    (out.into_owned(), count)
}

/// Quote character and contents of whichever alternative matched.
fn quoted_group<'t>(caps: &Captures<'t>) -> (&'static str, &'t str) {
    if let Some(m) = caps.get(1) {
        ("\"", m.as_str())
    } else if let Some(m) = caps.get(2) {
        ("'", m.as_str())
    } else {
        ("", caps.get(3).map_or("", |m| m.as_str()))
    }
}

/// Queue rewrites for every reference in `doc`. Returns how many changed.
pub fn rewrite_document(doc: &mut Document, rel: &str, resolver: &Resolver<'_>) -> usize {
    let mut count = 0;
    for id in doc.element_ids() {
        let tag = doc.element(id).tag();
        let mut localized = false;

        for attr in url_attrs(tag) {
            let replaced = {
                let Some(value) = doc.attr(id, attr.name()) else {
                    continue;
                };
                if attr.is_srcset() {
                    resolver.rewrite_srcset(&value, rel)
                } else {
                    resolver.rewrite(&value, rel)
                }
            };
            if let Some(new) = replaced {
                doc.set_attr(id, attr.name(), &new);
                count += 1;
                localized = true;
            }
        }

        // A local copy is rewritten and minified, so a pinned hash no longer matches it.
        if localized && matches!(tag, Tag::Script | Tag::Link) {
            doc.remove_attr(id, "integrity");
        }

        let style = doc
            .attr(id, "style")
            .map(|css| rewrite_stylesheet(&css, rel, resolver));
        if let Some((new, n)) = style
            && n > 0
        {
            doc.set_attr(id, "style", &new);
            count += n;
        }

        if tag == Tag::Style
            && let Some((new, n)) = doc.content(id).map(|css| rewrite_stylesheet(css, rel, resolver))
            && n > 0
        {
            doc.set_content(id, new);
            count += n;
        }
    }
    count
}

/// Counters for one rewriting pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RewriteStats {
    pub pages: usize,
    pub stylesheets: usize,
    /// Files written back because something changed.
    pub changed: usize,
    pub references: usize,
    pub scrubbed: ScrubStats,
    /// Files that could not be read, parsed or written; left as they were.
    pub failures: usize,
}

impl RewriteStats {
    fn merge(mut self, other: RewriteStats) -> Self {
        self.pages += other.pages;
        self.stylesheets += other.stylesheets;
        self.changed += other.changed;
        self.references += other.references;
        self.scrubbed.add(&other.scrubbed);
        self.failures += other.failures;
        self
    }
}

/// Rewrite one page in place.
fn rewrite_page(
    root: &Path,
    rel: &str,
    resolver: &Resolver<'_>,
    scrub_settings: Option<&ScrubSettings>,
) -> Result<RewriteStats, RewriteError> {
    let path = root.join(rel);
    let mut doc = Document::from_bytes(fs::read(&path)?, Flavor::for_path(rel))?;

    let references = rewrite_document(&mut doc, rel, resolver);
    let scrubbed = scrub_settings
        .map(|s| scrub::scrub(&mut doc, s))
        .unwrap_or_default();

    let mut stats = RewriteStats {
        pages: 1,
        references,
        scrubbed,
        ..RewriteStats::default()
    };
    if doc.is_modified() {
        fs::write(&path, doc.render())?;
        stats.changed = 1;
        debug!(file = rel, references, "page rewritten");
    }
    Ok(stats)
}

fn rewrite_css_file(
    root: &Path,
    rel: &str,
    resolver: &Resolver<'_>,
) -> Result<RewriteStats, RewriteError> {
    let path = root.join(rel);
    let css = fs::read_to_string(&path)?;
    let (new, references) = rewrite_stylesheet(&css, rel, resolver);

    let mut stats = RewriteStats {
        stylesheets: 1,
        references,
        ..RewriteStats::default()
    };
    if references > 0 {
        fs::write(&path, new)?;
        stats.changed = 1;
        debug!(file = rel, references, "stylesheet rewritten");
    }
    Ok(stats)
}

/// Rewrite every markup page and stylesheet listed in `index`.
///
/// `scrub_settings` enables scrubbing of pages. Per-file failures are logged
/// and counted; the file is left untouched.
pub fn rewrite_tree(
    root: &Path,
    index: &FileIndex,
    resolver: &Resolver<'_>,
    scrub_settings: Option<&ScrubSettings>,
) -> RewriteStats {
    let pages: Vec<&str> = index.markup_files().collect();
    let stylesheets: Vec<&str> = index.stylesheet_files().collect();

    let page_stats = pages
        .par_iter()
        .map(|rel| {
            rewrite_page(root, rel, resolver, scrub_settings).unwrap_or_else(|e| {
                warn!(file = rel, error = %e, "page left untouched");
                RewriteStats {
                    failures: 1,
                    ..RewriteStats::default()
                }
            })
        })
        .reduce(RewriteStats::default, RewriteStats::merge);

    let css_stats = stylesheets
        .par_iter()
        .map(|rel| {
            rewrite_css_file(root, rel, resolver).unwrap_or_else(|e| {
                warn!(file = rel, error = %e, "stylesheet left untouched");
                RewriteStats {
                    failures: 1,
                    ..RewriteStats::default()
                }
            })
        })
        .reduce(RewriteStats::default, RewriteStats::merge);

    page_stats.merge(css_stats)
}
