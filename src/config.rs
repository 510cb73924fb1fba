//! Run configuration.
//!
//! Handles loading, validating, and merging `rehydrate.toml`. Stock defaults are
//! serialized to a [`toml::Value`], the user file is merged on top, and the
//! result is deserialized with unknown keys rejected. Command-line flags
//! (`--domain`) are applied last via [`RunConfig::apply_domain`].
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [site]
//! # domain = "example.com"   # Enables cross-site rejection and the sitemap
//! archive_hosts = ["web.archive.org"]
//!
//! [consolidate]
//! on_conflict = "keep-destination"   # or "overwrite", "rename"
//!
//! [resolve]
//! max_prefix_strip = 2
//!
//! [prune]
//! trash_dirs = ["wp-content", "wp-includes", "wp-json", ...]
//! trash_extensions = ["php", "asp", "jsp"]
//!
//! [scrub]
//! enabled = true
//!
//! [images]
//! optimize = true
//! jpeg_quality = 85
//!
//! [minify]
//! enabled = true
//!
//! [sitemap]
//! enabled = true
//! changefreq = "weekly"
//! priority = 0.8
//!
//! [processing]
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::reference;
use crate::relocate::ConflictPolicy;
use crate::resolve::{DEFAULT_MAX_PREFIX_STRIP, ResolveSettings};
use crate::scrub::ScrubSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// File looked up in the working directory when no `--config` is given.
pub const CONFIG_FILENAME: &str = "rehydrate.toml";

/// Upper bound for `resolve.max_prefix_strip`.
pub const MAX_PREFIX_STRIP_LIMIT: usize = 8;

const CHANGEFREQ_VALUES: &[&str] = &[
    "always", "hourly", "daily", "weekly", "monthly", "yearly", "never",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Run configuration loaded from `rehydrate.toml`.
///
/// All fields have defaults. User files need only specify the values they want
/// to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub site: SiteConfig,
    pub consolidate: ConsolidateConfig,
    pub resolve: ResolveConfig,
    pub prune: PruneConfig,
    pub scrub: ScrubConfig,
    pub images: ImagesConfig,
    pub minify: MinifyConfig,
    pub sitemap: SitemapConfig,
    pub processing: ProcessingConfig,
}

impl RunConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(domain) = &self.site.domain
            && reference::domain_host(domain).is_none()
        {
            return Err(ConfigError::Validation(format!(
                "site.domain {domain:?} is not a valid host"
            )));
        }
        if self.site.archive_hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "site.archive_hosts must not contain empty entries".into(),
            ));
        }
        if self.resolve.max_prefix_strip > MAX_PREFIX_STRIP_LIMIT {
            return Err(ConfigError::Validation(format!(
                "resolve.max_prefix_strip must be 0-{MAX_PREFIX_STRIP_LIMIT}"
            )));
        }
        if self
            .prune
            .trash_dirs
            .iter()
            .chain(&self.prune.trash_extensions)
            .any(|s| s.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "prune entries must not be empty".into(),
            ));
        }
        if !(1..=100).contains(&self.images.jpeg_quality) {
            return Err(ConfigError::Validation(
                "images.jpeg_quality must be 1-100".into(),
            ));
        }
        if !CHANGEFREQ_VALUES.contains(&self.sitemap.changefreq.as_str()) {
            return Err(ConfigError::Validation(format!(
                "sitemap.changefreq must be one of {}",
                CHANGEFREQ_VALUES.join(", ")
            )));
        }
        if !(0.0..=1.0).contains(&self.sitemap.priority) {
            return Err(ConfigError::Validation(
                "sitemap.priority must be 0.0-1.0".into(),
            ));
        }
        Ok(())
    }

    /// Override the configured domain (the `--domain` flag), then re-validate.
    pub fn apply_domain(&mut self, domain: Option<&str>) -> Result<(), ConfigError> {
        if let Some(domain) = domain {
            self.site.domain = Some(domain.to_string());
            self.validate()?;
        }
        Ok(())
    }

    /// Host used for same-site checks, `www.` stripped.
    pub fn base_host(&self) -> Option<String> {
        self.site.domain.as_deref().and_then(reference::domain_host)
    }

    pub fn resolve_settings(&self) -> ResolveSettings {
        ResolveSettings {
            base_host: self.base_host(),
            archive_hosts: self.site.archive_hosts.clone(),
            max_prefix_strip: self.resolve.max_prefix_strip,
        }
    }

    /// Scrub settings, or `None` when scrubbing is disabled.
    pub fn scrub_settings(&self) -> Option<ScrubSettings> {
        self.scrub.enabled.then(|| ScrubSettings {
            archive_hosts: self.site.archive_hosts.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Public domain of the recovered site. Absolute links to other hosts are
    /// left alone, and the sitemap is only written when this is set.
    pub domain: Option<String>,
    /// Hosts whose capture URLs are unwrapped and whose assets are scrubbed.
    pub archive_hosts: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            domain: None,
            archive_hosts: vec!["web.archive.org".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsolidateConfig {
    /// Shared by donor flattening and asset consolidation.
    pub on_conflict: ConflictPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolveConfig {
    /// How many leading path segments the resolver may drop when hunting for a
    /// target. A heuristic for dumps whose folder layout was shifted.
    pub max_prefix_strip: usize,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            max_prefix_strip: DEFAULT_MAX_PREFIX_STRIP,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PruneConfig {
    /// Directory names removed wherever they appear.
    pub trash_dirs: Vec<String>,
    /// File extensions (without dot) removed wherever they appear.
    pub trash_extensions: Vec<String>,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            trash_dirs: [
                "wp-content",
                "wp-includes",
                "wp-json",
                "analytics",
                "google-analytics",
                "tagmanager",
                "www.googletagmanager.com",
            ]
            .map(String::from)
            .to_vec(),
            trash_extensions: ["php", "asp", "jsp"].map(String::from).to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScrubConfig {
    /// Remove the archive toolbar, playback scripts and archive comments.
    pub enabled: bool,
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    pub optimize: bool,
    /// JPEG re-encoding quality (1 = worst, 100 = best).
    pub jpeg_quality: u8,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            optimize: true,
            jpeg_quality: crate::imaging::DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MinifyConfig {
    pub enabled: bool,
}

impl Default for MinifyConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SitemapConfig {
    pub enabled: bool,
    pub changefreq: String,
    pub priority: f32,
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            changefreq: "weekly".to_string(),
            priority: 0.8,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(RunConfig::default()).expect("default config must serialize")
}

/// Deep-merge `overlay` onto `base`. Tables merge key by key; anything else in
/// the overlay replaces the base value.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value. A missing file is `Ok(None)`.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<RunConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: RunConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the run configuration.
///
/// An explicit path must exist. Without one, `rehydrate.toml` in `cwd` is used
/// when present and stock defaults otherwise.
pub fn load_config(explicit: Option<&Path>, cwd: &Path) -> Result<RunConfig, ConfigError> {
    let overlay = match explicit {
        Some(path) => {
            if !path.is_file() {
                return Err(ConfigError::Validation(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            load_raw_config(path)?
        }
        None => load_raw_config(&cwd.join(CONFIG_FILENAME))?,
    };
    resolve_config(stock_defaults_value(), overlay)
}

pub fn stock_config_toml() -> &'static str {
    r##"# Rehydrate Configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Looked up as ./rehydrate.toml unless --config is given.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Site identity
# ---------------------------------------------------------------------------
[site]
# Public domain of the recovered site. Absolute links to other hosts are
# left untouched, and robots.txt / sitemap.xml are only written when set.
# Can also be given as --domain.
# domain = "example.com"

# Archive hosts whose capture URLs are unwrapped back to the original URL
# and whose injected scripts and stylesheets are scrubbed.
archive_hosts = ["web.archive.org"]

# ---------------------------------------------------------------------------
# Asset consolidation
# ---------------------------------------------------------------------------
[consolidate]
# What to do when a file lands on an existing file with different content.
# "keep-destination", "overwrite" or "rename" (name (1).ext).
on_conflict = "keep-destination"

# ---------------------------------------------------------------------------
# Link resolution
# ---------------------------------------------------------------------------
[resolve]
# Leading path segments the resolver may drop when a target is not found
# where the link says. A heuristic for dumps saved under a shifted folder.
max_prefix_strip = 2

# ---------------------------------------------------------------------------
# Pruning
# ---------------------------------------------------------------------------
[prune]
# Directory names deleted wherever they appear (outside assets/).
trash_dirs = [
    "wp-content",
    "wp-includes",
    "wp-json",
    "analytics",
    "google-analytics",
    "tagmanager",
    "www.googletagmanager.com",
]

# File extensions (without dot) deleted wherever they appear.
trash_extensions = ["php", "asp", "jsp"]

# ---------------------------------------------------------------------------
# Archive scaffolding removal
# ---------------------------------------------------------------------------
[scrub]
enabled = true

# ---------------------------------------------------------------------------
# Image recompression
# ---------------------------------------------------------------------------
[images]
# Recompress JPEG/PNG/WebP in assets/images/, keeping results only if smaller.
optimize = true

# JPEG re-encoding quality (1 = worst, 100 = best).
jpeg_quality = 85

# ---------------------------------------------------------------------------
# Minification
# ---------------------------------------------------------------------------
[minify]
# Strip comments and blank lines from HTML, CSS and JS.
enabled = true

# ---------------------------------------------------------------------------
# Sitemap
# ---------------------------------------------------------------------------
[sitemap]
# Write robots.txt and sitemap.xml (requires site.domain).
enabled = true
changefreq = "weekly"
priority = 0.8

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
