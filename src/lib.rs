//! # Rehydrate
//!
//! Turns a raw web-archive crawl dump into a portable static site. The dump is
//! whatever a crawler saved: timestamp-prefixed directories, resources scattered
//! over dozens of paths with `?ver=` suffixes in their file names, and pages
//! whose links still point at the archive. The output is a tree you can open
//! from disk or drop on any file server.
//!
//! # Architecture: Staged Pipeline
//!
//! ```text
//! 1. Prepare       dump/    →  site/            (copy, flatten the domain root)
//! 2. Consolidate   site/    →  resources.json   (assets/{images,css,js,fonts}, dedup)
//! 3. Images        assets/images/               (recompress, keep only if smaller)
//! 4. Prune         site/                        (server leftovers, empty dirs)
//! 5. Rewrite       site/ + resources.json       (every reference made relative)
//! 6. Minify        site/                        (comments and blank lines)
//! 7. Sitemap       site/    →  robots.txt, sitemap.xml
//! ```
//!
//! Stages only share the output tree and the Resource Table, which is written
//! as JSON into the temp directory. Each stage can therefore run on its own
//! from the CLI, and a rerun of consolidation on its own output is a no-op.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`source`] | Donor discovery, copy into the output, domain-root flattening |
//! | [`assets`] | Asset consolidation, content dedup, the Resource Table |
//! | [`relocate`] | Moving a file onto a possibly occupied destination, per conflict policy |
//! | [`digest`] | Streamed SHA-256 of a file |
//! | [`index`] | The File Index: every path in the output, frozen before rewriting |
//! | [`reference`] | Decomposition of archived URLs, wrapper stripping, path cleaning |
//! | [`resolve`] | The resolver cascade from a reference to a relative path |
//! | [`markup`] | HTML and XML parsing with typed tags, URL attributes and span edits |
//! | [`rewrite`] | Applies the resolver to markup and stylesheets |
//! | [`scrub`] | Removes archive toolbars, playback scripts and comments |
//! | [`minify`] | Comment stripping for markup, stylesheets and scripts |
//! | [`imaging`] | Image recompression behind the [`imaging::ImageCodec`] trait |
//! | [`prune`] | Removal of trash directories, trash files and empty directories |
//! | [`sitemap`] | `robots.txt` and `sitemap.xml` |
//! | [`pipeline`] | Stage orchestration and reports |
//! | [`config`] | `rehydrate.toml` loading, merging and validation |
//! | [`output`] | CLI output formatting of stage reports |
//! | [`types`] | Shared types: asset classes, resource records, rewrite results |
//! | [`paths`] | Relative path helpers shared by all stages |
//!
//! # Design Decisions
//!
//! ## Leave It Alone When Unsure
//!
//! A reference that cannot be resolved is not an error: its text stays exactly
//! as it was. The same goes for a page that fails to parse or a script the
//! minifier cannot scan. A partly rewritten site is still more useful than one
//! with guessed links, and the log says which files were skipped.
//!
//! ## Frozen Inputs
//!
//! The Resource Table and File Index are built once and passed by reference.
//! Rewriting and minification only change file contents, never paths, so the
//! per-file work in those stages runs in parallel without locks.
//!
//! ## Scanner, Not Regex
//!
//! Script comment removal is a small state machine that knows about strings,
//! template literals and regex literals. A regular expression cannot tell
//! `"a // b"` from a comment, and getting that wrong breaks the page.

pub mod assets;
pub mod config;
pub mod digest;
pub mod imaging;
pub mod index;
pub mod markup;
pub mod minify;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod prune;
pub mod reference;
pub mod relocate;
pub mod resolve;
pub mod rewrite;
pub mod scrub;
pub mod sitemap;
pub mod source;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
