//! CLI output formatting for all pipeline stages.
//!
//! Output is a short inventory per stage: a header line naming the stage,
//! then indented counters. Zero counters for failures are omitted so a clean
//! run stays quiet.
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! Prepare
//!     Source: dump
//!     Copied 1204 files
//!     Domain root: web/2021/site.example (merged 1180, 3 duplicates)
//! Consolidate
//!     images: 310, css: 12, js: 21, fonts: 4
//!     Moved 402, 55 duplicates removed
//! Images
//!     Optimized 120 of 310, saved 2.4 MiB
//! Prune
//!     Removed 3 directories, 14 files, 27 empty directories
//! Rewrite
//!     88 pages, 12 stylesheets, 4120 references rewritten
//!     Scrubbed 88 toolbars, 264 elements, 91 comments
//! Minify
//!     Minified 97 of 121 files, saved 310.2 KiB
//! Sitemap
//!     88 URLs
//! ```
//!
//! # Architecture
//!
//! Each stage has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::imaging::ImageStats;
use crate::minify::MinifyStats;
use crate::pipeline::{BuildReport, CheckReport, ConsolidateReport};
use crate::prune::PruneStats;
use crate::rewrite::RewriteStats;
use crate::sitemap::SitemapReport;
use crate::source::PrepareReport;

// ============================================================================
// Shared helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn failures_line(failures: usize) -> Option<String> {
    (failures > 0).then(|| format!("{}{failures} failures (see log)", indent(1)))
}

// ============================================================================
// Stages
// ============================================================================

pub fn format_prepare(report: &PrepareReport) -> Vec<String> {
    let mut lines = vec!["Prepare".to_string()];
    lines.push(format!("{}Source: {}", indent(1), report.source.display()));
    lines.push(format!("{}Copied {} files", indent(1), report.files_copied));
    match &report.domain_root {
        Some(root) => {
            let m = &report.merge;
            let mut line = format!("{}Domain root: {root} (merged {}", indent(1), m.moved);
            if m.duplicates > 0 {
                line.push_str(&format!(", {} duplicates", m.duplicates));
            }
            if m.conflicts > 0 {
                line.push_str(&format!(", {} conflicts", m.conflicts));
            }
            line.push(')');
            lines.push(line);
        }
        None => lines.push(format!("{}Domain root: (top level)", indent(1))),
    }
    lines.extend(failures_line(report.merge.failures));
    lines
}

pub fn format_consolidate(report: &ConsolidateReport) -> Vec<String> {
    let mut lines = vec!["Consolidate".to_string()];
    if !report.assets.is_empty() {
        let per_class: Vec<String> = report
            .assets
            .iter()
            .map(|(class, n)| format!("{class}: {n}"))
            .collect();
        lines.push(format!("{}{}", indent(1), per_class.join(", ")));
    }
    let s = &report.stats;
    let mut line = format!(
        "{}Moved {}, {} duplicates removed",
        indent(1),
        s.moved,
        s.duplicates
    );
    if s.conflicts > 0 {
        line.push_str(&format!(", {} name conflicts", s.conflicts));
    }
    lines.push(line);
    lines.extend(failures_line(s.failures));
    lines
}

pub fn format_images(stats: Option<&ImageStats>) -> Vec<String> {
    let mut lines = vec!["Images".to_string()];
    match stats {
        Some(s) => {
            lines.push(format!(
                "{}Optimized {} of {}, saved {}",
                indent(1),
                s.optimized,
                s.files,
                format_bytes(s.bytes_saved)
            ));
            lines.extend(failures_line(s.failures));
        }
        None => lines.push(format!("{}skipped", indent(1))),
    }
    lines
}

pub fn format_prune(stats: &PruneStats) -> Vec<String> {
    let mut lines = vec!["Prune".to_string()];
    lines.push(format!(
        "{}Removed {} directories, {} files, {} empty directories",
        indent(1),
        stats.dirs,
        stats.files,
        stats.empty_dirs
    ));
    lines.extend(failures_line(stats.failures));
    lines
}

pub fn format_rewrite(stats: &RewriteStats) -> Vec<String> {
    let mut lines = vec!["Rewrite".to_string()];
    lines.push(format!(
        "{}{} pages, {} stylesheets, {} references rewritten",
        indent(1),
        stats.pages,
        stats.stylesheets,
        stats.references
    ));
    let s = &stats.scrubbed;
    if s.total() > 0 {
        lines.push(format!(
            "{}Scrubbed {} toolbars, {} elements, {} comments",
            indent(1),
            s.toolbars,
            s.elements,
            s.comments
        ));
    }
    lines.extend(failures_line(stats.failures));
    lines
}

pub fn format_minify(stats: Option<&MinifyStats>) -> Vec<String> {
    let mut lines = vec!["Minify".to_string()];
    match stats {
        Some(s) => {
            lines.push(format!(
                "{}Minified {} of {} files, saved {}",
                indent(1),
                s.changed,
                s.files,
                format_bytes(s.bytes_saved)
            ));
            lines.extend(failures_line(s.failures));
        }
        None => lines.push(format!("{}skipped", indent(1))),
    }
    lines
}

pub fn format_sitemap(report: Option<&SitemapReport>) -> Vec<String> {
    let line = match report {
        Some(r) => format!("{}{} URLs", indent(1), r.urls),
        None => format!("{}skipped (no domain)", indent(1)),
    };
    vec!["Sitemap".to_string(), line]
}

pub fn format_build(report: &BuildReport) -> Vec<String> {
    let mut lines = format_prepare(&report.prepare);
    lines.extend(format_consolidate(&report.consolidate));
    lines.extend(format_images(report.images.as_ref()));
    lines.extend(format_prune(&report.prune));
    lines.extend(format_rewrite(&report.rewrite));
    lines.extend(format_minify(report.minify.as_ref()));
    lines.extend(format_sitemap(report.sitemap.as_ref()));
    lines
}

/// Inventory of a donor, as reported by `check`.
///
/// ```text
/// Source: dump
///     Domain root: web/2021/site.example
///     1204 files, 88 pages
/// Assets to gather
///     css (2)
///         web/2021/site.example/style.css
///         web/2021/site.example/old/style (1).css
/// ```
pub fn format_check(report: &CheckReport) -> Vec<String> {
    let mut lines = vec![format!("Source: {}", report.source.display())];
    lines.push(format!(
        "{}Domain root: {}",
        indent(1),
        report.domain_root.as_deref().unwrap_or("(top level)")
    ));
    lines.push(format!("{}{} files, {} pages", indent(1), report.files, report.pages));
    if !report.plan.is_empty() {
        lines.push("Assets to gather".to_string());
        for (class, files) in &report.plan {
            lines.push(format!("{}{class} ({})", indent(1), files.len()));
            lines.extend(files.iter().map(|f| format!("{}{f}", indent(2))));
        }
    }
    lines
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

pub fn print_prepare(report: &PrepareReport) {
    print_lines(format_prepare(report));
}

pub fn print_consolidate(report: &ConsolidateReport) {
    print_lines(format_consolidate(report));
}

pub fn print_rewrite(stats: &RewriteStats) {
    print_lines(format_rewrite(stats));
}

pub fn print_minify(stats: Option<&MinifyStats>) {
    print_lines(format_minify(stats));
}

pub fn print_build(report: &BuildReport) {
    print_lines(format_build(report));
}

pub fn print_check(report: &CheckReport) {
    print_lines(format_check(report));
}
