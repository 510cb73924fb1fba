//! Link resolution: map one reference found in a file onto a file of the output
//! tree, expressed relative to the referencing file.
//!
//! ```text
//! raw reference
//!   │ reference::classify      archive wrapper, scheme, host
//!   ▼
//! local path (query + fragment split off, percent-decoded, normalized)
//!   │ 1. Resource Table        asset names: normalized key, exact name, full path
//!   │ 2. resource shortcut     known resource extension present in the index
//!   │ 3. cascade               exact → dir/index page → noext/index page → .html
//!   │ 4. prefix stripping      drop 1..=N leading segments, retry 2 and 3
//!   ▼
//! relative, percent-encoded path + original fragment
//! ```
//!
//! First success wins. Anything that falls through is left exactly as written.
//!
//! Prefix stripping is a heuristic: dumps often nest pages under a directory
//! named after the host or a language code (`/site.example/blog/`,
//! `/en/blog/`) that no longer exists once the tree is flattened. The budget
//! is small because every extra segment widens the chance of a wrong match.

use crate::assets::{self, ResourceTable};
use crate::index::FileIndex;
use crate::paths;
use crate::reference::{self, Target};
use crate::types::{AssetClass, RewriteResult};
use percent_encoding::percent_decode_str;

/// Extensions that name a concrete resource rather than a page route. Paths with
/// these extensions only ever match exactly.
const RESOURCE_EXTENSIONS: &[&str] = &[
    "css", "js", "mjs", "json", "map", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "avif",
    "bmp", "ttf", "otf", "eot", "woff", "woff2", "mp3", "mp4", "webm", "ogg", "pdf", "txt", "xml",
    "rss",
];

/// Default number of leading segments the resolver may strip.
pub const DEFAULT_MAX_PREFIX_STRIP: usize = 2;

/// Site-wide inputs of the resolver that come from configuration.
#[derive(Debug, Clone)]
pub struct ResolveSettings {
    /// Host of the site, without `www.`. `None` makes every absolute URL foreign.
    pub base_host: Option<String>,
    pub archive_hosts: Vec<String>,
    pub max_prefix_strip: usize,
}

impl Default for ResolveSettings {
    fn default() -> Self {
        Self {
            base_host: None,
            archive_hosts: vec!["web.archive.org".to_string()],
            max_prefix_strip: DEFAULT_MAX_PREFIX_STRIP,
        }
    }
}

/// Resolves references against a frozen Resource Table and File Index.
///
/// Holds only shared borrows, so one resolver is shared by every rewriting task.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    table: &'a ResourceTable,
    index: &'a FileIndex,
    settings: &'a ResolveSettings,
}

fn is_resource(path: &str) -> bool {
    paths::extension(path).is_some_and(|ext| RESOURCE_EXTENSIONS.contains(&ext.as_str()))
}

impl<'a> Resolver<'a> {
    pub fn new(table: &'a ResourceTable, index: &'a FileIndex, settings: &'a ResolveSettings) -> Self {
        Self {
            table,
            index,
            settings,
        }
    }

    /// Resolve `raw`, found in the site-relative file `referencing_file`.
    pub fn resolve(&self, raw: &str, referencing_file: &str) -> RewriteResult {
        let Target::Local { path, relative } = reference::classify(
            raw,
            &self.settings.archive_hosts,
            self.settings.base_host.as_deref(),
        ) else {
            return RewriteResult::unresolved();
        };

        let (path, _query, fragment) = reference::split_suffix(&path);
        if relative && path.is_empty() {
            // `?page=2` or `#top`: points back at the referencing document.
            return RewriteResult::unresolved();
        }

        let decoded = percent_decode_str(path).decode_utf8_lossy();
        let cleaned = if relative {
            paths::join(paths::parent_dir(referencing_file), &decoded)
        } else {
            paths::normalize(&decoded)
        };

        match self.locate(&cleaned) {
            Some(target) => {
                let rel = paths::relative_path(referencing_file, target);
                RewriteResult {
                    resolved_path: Some(paths::encode_url_path(&rel)),
                    fragment: fragment.filter(|f| !f.is_empty()).map(str::to_string),
                }
            }
            None => RewriteResult::unresolved(),
        }
    }

    /// New text for `raw`, or `None` if it stays as is.
    pub fn rewrite(&self, raw: &str, referencing_file: &str) -> Option<String> {
        let replaced = self.resolve(raw, referencing_file).to_reference()?;
        (replaced != raw).then_some(replaced)
    }

    /// Rewrite every URL of a `srcset` value, keeping order and descriptors.
    ///
    /// Returns `None` when no candidate changed.
    pub fn rewrite_srcset(&self, value: &str, referencing_file: &str) -> Option<String> {
        let mut changed = false;
        let candidates: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|candidate| {
                let (url, descriptor) = match candidate.split_once(char::is_whitespace) {
                    Some((u, d)) => (u, d.trim()),
                    None => (candidate, ""),
                };
                let url = match self.rewrite(url, referencing_file) {
                    Some(new) => {
                        changed = true;
                        new
                    }
                    None => url.to_string(),
                };
                if descriptor.is_empty() {
                    url
                } else {
                    format!("{url} {descriptor}")
                }
            })
            .collect();
        changed.then(|| candidates.join(", "))
    }

    /// Site-relative path of the file a cleaned path refers to.
    ///
    /// `cleaned` is already percent-decoded; the table is queried without a
    /// second decoding pass.
    pub fn locate(&self, cleaned: &str) -> Option<&'a str> {
        if !cleaned.ends_with('/') {
            let name = paths::basename(cleaned);
            if AssetClass::from_name(&assets::normalize_decoded_key(name)).is_some() {
                // A copy that lost a name conflict stays where it was and is only
                // reachable by its own path; the table entry for its name is
                // another file.
                if !assets::is_canonical_asset_path(cleaned)
                    && self.table.lookup_path(cleaned).is_none()
                    && let Some(kept) = self.index.get(cleaned)
                {
                    return Some(kept);
                }
                if let Some(hit) = self
                    .table
                    .lookup_name(name)
                    .or_else(|| self.table.lookup_path(cleaned))
                {
                    return Some(hit);
                }
            }
        }

        let resource = is_resource(cleaned);
        if let Some(hit) = self.cascade(cleaned, resource) {
            return Some(hit);
        }

        let trailing = cleaned.ends_with('/');
        let segments: Vec<&str> = cleaned.split('/').filter(|s| !s.is_empty()).collect();
        let budget = self
            .settings
            .max_prefix_strip
            .min(segments.len().saturating_sub(1));
        (1..=budget).find_map(|cut| {
            let mut candidate = segments[cut..].join("/");
            if trailing {
                candidate.push('/');
            }
            self.cascade(&candidate, resource)
        })
    }

    /// Try the page-route variants of `path` against the File Index.
    fn cascade(&self, path: &str, resource: bool) -> Option<&'a str> {
        if path.is_empty() {
            return self.index.index_page("");
        }
        if let Some(hit) = self.index.find(path) {
            return Some(hit);
        }
        if resource {
            return None;
        }
        if let Some(dir) = path.strip_suffix('/') {
            return self.index.index_page(dir);
        }
        if !paths::basename(path).contains('.')
            && let Some(hit) = self.index.index_page(path)
        {
            return Some(hit);
        }
        if !path.to_ascii_lowercase().ends_with(".html") {
            return self.index.find(&format!("{path}.html"));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ResolveSettings {
        ResolveSettings {
            base_host: Some("site.example".into()),
            ..ResolveSettings::default()
        }
    }

    fn index() -> FileIndex {
        FileIndex::from_paths([
            "index.html",
            "about/index.html",
            "contact.html",
            "blog/post/index.html",
            "blog/post/image.png",
            "docs/Guide.html",
            "files/report.pdf",
            "assets/css/styles (1).css",
            "assets/images/logo.png",
        ])
    }

    fn table() -> ResourceTable {
        let mut t = ResourceTable::new();
        t.insert(AssetClass::Css, "styles (1).css", "assets/css/styles (1).css");
        t.insert(AssetClass::Css, "styles.css", "assets/css/styles (1).css");
        t.insert(AssetClass::Image, "logo.png", "assets/images/logo.png");
        t
    }

    fn resolve(raw: &str, from: &str) -> Option<String> {
        let (t, i, s) = (table(), index(), settings());
        Resolver::new(&t, &i, &s).resolve(raw, from).to_reference()
    }

    // =========================================================================
    // Resource Table
    // =========================================================================

    #[test]
    fn duplicate_stylesheet_reference_points_at_survivor() {
        assert_eq!(
            resolve("old/styles (1).css?v=2", "index.html").as_deref(),
            Some("assets/css/styles%20(1).css")
        );
        assert_eq!(
            resolve("/wp-content/themes/x/styles.css", "blog/post/index.html").as_deref(),
            Some("../../assets/css/styles%20(1).css")
        );
    }

    #[test]
    fn asset_reference_through_archive_wrapper() {
        assert_eq!(
            resolve(
                "https://web.archive.org/web/2020im_/https://site.example/img/logo.png",
                "about/index.html"
            )
            .as_deref(),
            Some("../assets/images/logo.png")
        );
    }

    #[test]
    fn encoded_asset_name_is_decoded_once() {
        assert_eq!(
            resolve("css/styles%20(1).css", "index.html").as_deref(),
            Some("assets/css/styles%20(1).css")
        );
        // `%2520` decodes to a literal `%20`, which is not a space.
        assert_eq!(resolve("css/styles%2520(1).css", "index.html"), None);
    }

    #[test]
    fn source_kept_after_a_name_conflict_stays_reachable() {
        // x/logo.png became assets/images/logo.png; y/logo.png had other bytes
        // and stayed where it was.
        let t = table();
        let i = FileIndex::from_paths([
            "assets/images/logo.png",
            "y/logo.png",
            "y/page.html",
            "index.html",
        ]);
        let s = settings();
        let r = Resolver::new(&t, &i, &s);

        let kept = r.resolve("logo.png", "y/page.html");
        assert_eq!(kept.resolved_path.as_deref(), Some("logo.png"));
        assert_eq!(
            r.resolve("/y/logo.png", "index.html").resolved_path.as_deref(),
            Some("y/logo.png")
        );
        assert_eq!(
            r.resolve("/x/logo.png", "y/page.html").resolved_path.as_deref(),
            Some("../assets/images/logo.png")
        );
        assert_eq!(
            r.resolve("logo.png", "index.html").resolved_path.as_deref(),
            Some("assets/images/logo.png")
        );
    }

    // =========================================================================
    // Cascade
    // =========================================================================

    #[test]
    fn same_directory_image() {
        assert_eq!(
            resolve("/blog/post/image.png", "blog/post/index.html").as_deref(),
            Some("image.png")
        );
    }

    #[test]
    fn directory_and_extensionless_routes() {
        assert_eq!(resolve("/about/", "index.html").as_deref(), Some("about/index.html"));
        assert_eq!(resolve("/about", "contact.html").as_deref(), Some("about/index.html"));
        assert_eq!(resolve("/contact", "about/index.html").as_deref(), Some("../contact.html"));
        assert_eq!(resolve("/", "about/index.html").as_deref(), Some("../index.html"));
        assert_eq!(
            resolve("https://www.site.example", "blog/post/index.html").as_deref(),
            Some("../../index.html")
        );
    }

    #[test]
    fn relative_references_join_onto_directory() {
        assert_eq!(resolve("../../contact", "blog/post/index.html").as_deref(), Some("../../contact.html"));
        assert_eq!(resolve("./", "about/index.html").as_deref(), Some("index.html"));
    }

    #[test]
    fn fragment_kept_query_dropped() {
        assert_eq!(
            resolve("/about/?ref=nav#team", "index.html").as_deref(),
            Some("about/index.html#team")
        );
    }

    #[test]
    fn directory_routes_use_the_index_page_of_the_directory() {
        let (t, s) = (table(), settings());
        let i = FileIndex::from_paths(["index.html", "legacy/index.htm", "Team/index.html"]);
        let r = Resolver::new(&t, &i, &s);
        let resolve = |raw| r.resolve(raw, "index.html").to_reference();
        assert_eq!(resolve("/legacy/").as_deref(), Some("legacy/index.htm"));
        assert_eq!(resolve("/legacy").as_deref(), Some("legacy/index.htm"));
        assert_eq!(resolve("/team/").as_deref(), Some("Team/index.html"));
        assert_eq!(resolve("/nowhere/"), None);
    }

    #[test]
    fn case_insensitive_fallback() {
        assert_eq!(resolve("/docs/guide.html", "index.html").as_deref(), Some("docs/Guide.html"));
    }

    #[test]
    fn resource_extension_only_matches_exactly() {
        assert_eq!(resolve("/files/report.pdf", "index.html").as_deref(), Some("files/report.pdf"));
        assert_eq!(resolve("/files/missing.pdf", "index.html"), None);
    }

    // =========================================================================
    // Prefix stripping
    // =========================================================================

    #[test]
    fn strips_stale_leading_segments() {
        assert_eq!(resolve("/en/about/", "index.html").as_deref(), Some("about/index.html"));
        assert_eq!(
            resolve("/site.example/en/contact", "index.html").as_deref(),
            Some("contact.html")
        );
    }

    #[test]
    fn prefix_budget_is_respected() {
        assert_eq!(resolve("/a/b/c/contact", "index.html"), None);

        let (t, i) = (table(), index());
        let wide = ResolveSettings {
            max_prefix_strip: 3,
            ..settings()
        };
        let resolver = Resolver::new(&t, &i, &wide);
        assert_eq!(
            resolver.resolve("/a/b/c/contact", "index.html").to_reference().as_deref(),
            Some("contact.html")
        );
    }

    #[test]
    fn never_strips_every_segment() {
        // Stripping "nothing" would land on the root index.
        assert_eq!(resolve("/nothing", "about/index.html"), None);
    }

    // =========================================================================
    // Unresolved
    // =========================================================================

    #[test]
    fn foreign_and_unknown_references_stay_verbatim() {
        for raw in [
            "https://evil.example/x",
            "mailto:me@site.example",
            "#top",
            "?page=2",
            "/does/not/exist/at/all",
        ] {
            assert_eq!(resolve(raw, "index.html"), None, "{raw}");
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let first = resolve("/en/about/", "blog/post/index.html");
        for _ in 0..10 {
            assert_eq!(resolve("/en/about/", "blog/post/index.html"), first);
        }
    }

    #[test]
    fn rewrite_reports_no_change_when_already_canonical() {
        let (t, i, s) = (table(), index(), settings());
        let r = Resolver::new(&t, &i, &s);
        assert_eq!(r.rewrite("image.png", "blog/post/index.html"), None);
        assert_eq!(
            r.rewrite("/blog/post/image.png", "blog/post/index.html").as_deref(),
            Some("image.png")
        );
    }

    // =========================================================================
    // srcset
    // =========================================================================

    #[test]
    fn srcset_candidates_resolve_independently() {
        let (t, i, s) = (table(), index(), settings());
        let r = Resolver::new(&t, &i, &s);
        assert_eq!(
            r.rewrite_srcset(
                "/img/logo.png 1x, https://cdn.other.example/x.png 2x,/blog/post/image.png 640w",
                "about/index.html"
            )
            .as_deref(),
            Some("../assets/images/logo.png 1x, https://cdn.other.example/x.png 2x, ../blog/post/image.png 640w")
        );
        assert_eq!(r.rewrite_srcset("https://cdn.other.example/x.png 2x", "index.html"), None);
    }
}
