//! Shared types used across pipeline stages.
//!
//! [`AssetClass`] and [`ResourceRecord`] are produced by the consolidation stage
//! and serialized into the temp directory between stages; [`RewriteResult`] is the
//! output of the link resolver consumed by the rewriter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root of the canonical asset layout inside the output tree.
pub const ASSETS_DIR: &str = "assets";

/// The four resource classes that get a canonical directory under `assets/`.
///
/// Classification is purely by file extension; see [`AssetClass::from_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Image,
    Css,
    Js,
    Font,
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "ico", "avif",
];
const CSS_EXTENSIONS: &[&str] = &["css"];
const JS_EXTENSIONS: &[&str] = &["js", "mjs"];
const FONT_EXTENSIONS: &[&str] = &["woff", "woff2", "ttf", "otf", "eot"];

impl AssetClass {
    /// Every class, in the order the consolidator processes them.
    pub const ALL: [AssetClass; 4] = [
        AssetClass::Image,
        AssetClass::Css,
        AssetClass::Js,
        AssetClass::Font,
    ];

    /// Directory name under `assets/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            AssetClass::Image => "images",
            AssetClass::Css => "css",
            AssetClass::Js => "js",
            AssetClass::Font => "fonts",
        }
    }

    /// Canonical directory relative to the site root, e.g. `assets/css`.
    pub fn canonical_dir(self) -> String {
        format!("{ASSETS_DIR}/{}", self.dir_name())
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            AssetClass::Image => IMAGE_EXTENSIONS,
            AssetClass::Css => CSS_EXTENSIONS,
            AssetClass::Js => JS_EXTENSIONS,
            AssetClass::Font => FONT_EXTENSIONS,
        }
    }

    /// Classify a plain file name by its extension (case-insensitive).
    ///
    /// The name is expected to be free of query/version suffixes already;
    /// callers holding raw archive names go through
    /// [`normalize_key`](crate::assets::normalize_key) first.
    pub fn from_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|class| class.extensions().contains(&ext.as_str()))
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One physical file after consolidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// File name as found on disk (may still carry an archive suffix).
    pub original_name: String,
    /// Percent-decoded, case-folded name with version/query suffixes removed.
    pub normalized_key: String,
    pub class: AssetClass,
    /// SHA-256 of the contents, lowercase hex.
    pub content_digest: String,
    /// Site-relative path of the surviving file, e.g. `assets/css/main.css`.
    pub canonical_path: String,
}

/// Outcome of resolving one reference.
///
/// When `resolved_path` is `None` the caller must leave the reference exactly as it
/// was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteResult {
    /// Path relative to the referencing file's directory.
    pub resolved_path: Option<String>,
    pub fragment: Option<String>,
}

impl RewriteResult {
    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_path.is_some()
    }

    /// Render as reference text: the relative path plus `#fragment` if any.
    pub fn to_reference(&self) -> Option<String> {
        let path = self.resolved_path.as_deref()?;
        Some(match self.fragment.as_deref() {
            Some(frag) if !frag.is_empty() => format!("{path}#{frag}"),
            _ => path.to_string(),
        })
    }
}
