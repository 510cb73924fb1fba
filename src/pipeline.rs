//! Stage orchestration.
//!
//! ```text
//! prepare → consolidate → optimize images → prune → index → rewrite (+scrub) → minify → sitemap
//! ```
//!
//! Each `run_*` function is one stage and returns its report; [`build`] runs
//! them all and collects a [`BuildReport`]. Stages talk to each other through
//! the output tree and the Resource Table persisted in the temp directory, so
//! each can also be run on its own from the CLI.
//!
//! Only preconditions are fatal ([`PipelineError`]). Once the output exists, a
//! failing stage is logged and the next one runs.

use crate::assets::{self, ResourceTable};
use crate::config::{ConfigError, RunConfig};
use crate::imaging::{self, ImageCodec, ImageStats};
use crate::index::{self, FileIndex};
use crate::minify::{self, MinifyStats};
use crate::prune::{self, PruneStats};
use crate::resolve::Resolver;
use crate::rewrite::{self, RewriteStats};
use crate::sitemap::{self, SitemapReport};
use crate::source::{self, PrepareReport, SourceError};
use crate::types::AssetClass;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("output directory {0} does not exist, run prepare first")]
    NotPrepared(PathBuf),
}

/// Where a run reads and writes, all absolute or relative to the same cwd.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub cwd: PathBuf,
    pub output: PathBuf,
    pub temp_dir: PathBuf,
}

impl Workspace {
    pub fn new(cwd: &Path, output: &Path, temp_dir: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            output: cwd.join(output),
            temp_dir: cwd.join(temp_dir),
        }
    }

    /// The donor: `explicit` if given, otherwise the only candidate directory.
    pub fn locate_source(&self, explicit: Option<&Path>) -> Result<PathBuf, PipelineError> {
        Ok(source::locate_donor(
            &self.cwd,
            explicit,
            &[&self.output, &self.temp_dir],
        )?)
    }

    fn require_output(&self) -> Result<(), PipelineError> {
        if self.output.is_dir() {
            Ok(())
        } else {
            Err(PipelineError::NotPrepared(self.output.clone()))
        }
    }
}

// ============================================================================
// Stages
// ============================================================================

/// Recreate the output from the donor and flatten it. Drops any Resource Table
/// left in the temp dir, since it describes a tree that no longer exists.
pub fn run_prepare(
    source: &Path,
    ws: &Workspace,
    config: &RunConfig,
) -> Result<PrepareReport, PipelineError> {
    let report = source::prepare(source, &ws.output, config.consolidate.on_conflict)?;
    let table = assets::table_path(&ws.temp_dir);
    if table.exists() {
        fs::remove_file(&table)?;
    }
    Ok(report)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsolidateReport {
    pub stats: assets::ConsolidateStats,
    /// Surviving files per class.
    pub assets: BTreeMap<AssetClass, usize>,
}

/// Consolidate assets and persist the Resource Table, seeded from the previous
/// table in the temp dir if there is one.
pub fn run_consolidate(ws: &Workspace, config: &RunConfig) -> Result<ConsolidateReport, PipelineError> {
    ws.require_output()?;
    let seed = ResourceTable::load(&ws.temp_dir);
    let result = assets::consolidate(&ws.output, config.consolidate.on_conflict, seed.as_ref())?;
    result.table.save(&ws.temp_dir)?;

    let mut per_class = BTreeMap::new();
    for record in &result.records {
        *per_class.entry(record.class).or_insert(0) += 1;
    }
    Ok(ConsolidateReport {
        stats: result.stats,
        assets: per_class,
    })
}

/// Recompress images with `codec`, unless disabled in the config.
pub fn run_optimize_images(
    ws: &Workspace,
    config: &RunConfig,
    codec: &dyn ImageCodec,
) -> Result<Option<ImageStats>, PipelineError> {
    ws.require_output()?;
    if !config.images.optimize {
        info!("image optimization disabled");
        return Ok(None);
    }
    Ok(Some(imaging::optimize_images(&ws.output, codec)))
}

pub fn run_prune(ws: &Workspace, config: &RunConfig) -> Result<PruneStats, PipelineError> {
    ws.require_output()?;
    Ok(prune::prune(&ws.output, &config.prune))
}

/// Resolve every reference and scrub archive scaffolding, using the persisted
/// Resource Table and a fresh File Index.
pub fn run_rewrite(ws: &Workspace, config: &RunConfig) -> Result<RewriteStats, PipelineError> {
    ws.require_output()?;
    let index = FileIndex::build(&ws.output);
    Ok(rewrite_with_index(ws, config, &index))
}

fn rewrite_with_index(ws: &Workspace, config: &RunConfig, index: &FileIndex) -> RewriteStats {
    let table = ResourceTable::load(&ws.temp_dir).unwrap_or_else(|| {
        warn!(
            path = %assets::table_path(&ws.temp_dir).display(),
            "no resource table, resolving against the file index only"
        );
        ResourceTable::new()
    });
    let settings = config.resolve_settings();
    let resolver = Resolver::new(&table, index, &settings);
    let scrub = config.scrub_settings();
    rewrite::rewrite_tree(&ws.output, index, &resolver, scrub.as_ref())
}

pub fn run_minify(ws: &Workspace, config: &RunConfig) -> Result<Option<MinifyStats>, PipelineError> {
    ws.require_output()?;
    if !config.minify.enabled {
        info!("minification disabled");
        return Ok(None);
    }
    let index = FileIndex::build(&ws.output);
    Ok(Some(minify::minify_tree(&ws.output, &index)))
}

/// Write `robots.txt` and `sitemap.xml` when enabled and a domain is known.
fn sitemap_with_index(
    ws: &Workspace,
    config: &RunConfig,
    index: &FileIndex,
    today: NaiveDate,
) -> io::Result<Option<SitemapReport>> {
    if !config.sitemap.enabled {
        return Ok(None);
    }
    let Some(host) = config.base_host() else {
        info!("no domain configured, skipping robots.txt and sitemap.xml");
        return Ok(None);
    };
    sitemap::write_sitemap(&ws.output, index, &host, &config.sitemap, today).map(Some)
}

// ============================================================================
// Build
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct BuildReport {
    pub prepare: PrepareReport,
    pub consolidate: ConsolidateReport,
    pub images: Option<ImageStats>,
    pub prune: PruneStats,
    pub rewrite: RewriteStats,
    pub minify: Option<MinifyStats>,
    pub sitemap: Option<SitemapReport>,
}

/// Run every stage in order. `codec` is `None` when no image backend is
/// available; the optimization stage is then skipped.
pub fn build(
    source: &Path,
    ws: &Workspace,
    config: &RunConfig,
    codec: Option<&dyn ImageCodec>,
    today: NaiveDate,
) -> Result<BuildReport, PipelineError> {
    let prepare = run_prepare(source, ws, config)?;

    let consolidate = run_consolidate(ws, config).unwrap_or_else(|e| {
        warn!(error = %e, "consolidation failed");
        ConsolidateReport::default()
    });

    let images = match codec {
        Some(codec) => run_optimize_images(ws, config, codec)?,
        None => None,
    };

    let prune = run_prune(ws, config)?;

    // Frozen from here on: rewriting and minifying change contents, not paths.
    let index = FileIndex::build(&ws.output);
    info!(files = index.len(), "file index built");

    let rewrite = rewrite_with_index(ws, config, &index);
    let minify = config
        .minify
        .enabled
        .then(|| minify::minify_tree(&ws.output, &index));
    let sitemap = sitemap_with_index(ws, config, &index, today).unwrap_or_else(|e| {
        warn!(error = %e, "could not write sitemap");
        None
    });

    Ok(BuildReport {
        prepare,
        consolidate,
        images,
        prune,
        rewrite,
        minify,
        sitemap,
    })
}

// ============================================================================
// Check
// ============================================================================

/// What a build would find, computed without touching the donor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub source: PathBuf,
    /// Domain root relative to the donor; `None` when it is the donor itself or
    /// no index page exists.
    pub domain_root: Option<String>,
    pub files: usize,
    pub pages: usize,
    /// Assets that would be gathered, per class.
    pub plan: BTreeMap<AssetClass, Vec<String>>,
}

pub fn check(source: &Path) -> Result<CheckReport, PipelineError> {
    if !source.is_dir() {
        return Err(SourceError::Missing(source.to_path_buf()).into());
    }
    let root = source::find_domain_root(source);
    let domain_root = root
        .as_deref()
        .filter(|r| *r != source)
        .and_then(|r| crate::paths::rel_to_root(source, r));

    let index = FileIndex::build(source);
    Ok(CheckReport {
        source: source.to_path_buf(),
        domain_root,
        files: index.len(),
        pages: index.iter().filter(|rel| index::is_page(rel)).count(),
        plan: assets::plan(source),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockCodec;
    use crate::test_helpers::{list_files, read, write_tree};
    use tempfile::TempDir;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    fn setup() -> (TempDir, Workspace, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let donor = tmp.path().join("dump");
        write_tree(
            &donor,
            &[
                (
                    "web/site.example/index.html",
                    "<html><head><title>Home</title></head><body><!-- page note --><a href=\"/blog/\">Blog</a><img src=\"img/logo.png?v=3\"></body></html>",
                ),
                ("web/site.example/blog/index.html", "<a href=\"../\">Home</a>"),
                ("web/site.example/img/logo.png", "PNG"),
                ("web/site.example/xmlrpc.php", ""),
            ],
        );
        let ws = Workspace::new(tmp.path(), Path::new("site"), Path::new(".rehydrate-temp"));
        (tmp, ws, donor)
    }

    #[test]
    fn stages_require_a_prepared_output() {
        let (_tmp, ws, _) = setup();
        let config = RunConfig::default();
        assert!(matches!(run_rewrite(&ws, &config), Err(PipelineError::NotPrepared(_))));
        assert!(matches!(run_consolidate(&ws, &config), Err(PipelineError::NotPrepared(_))));
    }

    #[test]
    fn locate_source_skips_output_and_temp() {
        let (_tmp, ws, donor) = setup();
        fs::create_dir_all(&ws.output).unwrap();
        fs::create_dir_all(&ws.temp_dir).unwrap();
        assert_eq!(ws.locate_source(None).unwrap(), donor);
    }

    #[test]
    fn build_runs_every_stage() {
        let (_tmp, ws, donor) = setup();
        let mut config = RunConfig::default();
        config.site.domain = Some("site.example".to_string());
        let codec = MockCodec::new(1);

        let report = build(&donor, &ws, &config, Some(&codec), today()).unwrap();

        assert_eq!(report.prepare.domain_root.as_deref(), Some("web/site.example"));
        assert_eq!(report.consolidate.assets.get(&AssetClass::Image), Some(&1));
        assert_eq!(report.images.as_ref().map(|i| i.files), Some(1));
        assert_eq!(report.prune.files, 1);
        assert_eq!(report.sitemap, Some(SitemapReport { urls: 2 }));

        assert_eq!(
            list_files(&ws.output),
            [
                "assets/images/logo.png",
                "blog/index.html",
                "index.html",
                "robots.txt",
                "sitemap.xml"
            ]
        );
        let home = read(&ws.output, "index.html");
        assert!(home.contains("<a href=\"blog/index.html\">"));
        assert!(home.contains("<img src=\"assets/images/logo.png\">"));
        assert!(!home.contains("page note"));
        assert_eq!(read(&ws.output, "blog/index.html"), "<a href=\"../index.html\">Home</a>");
        assert!(assets::table_path(&ws.temp_dir).exists());
    }

    #[test]
    fn build_without_domain_or_codec_skips_optional_stages() {
        let (_tmp, ws, donor) = setup();
        let report = build(&donor, &ws, &RunConfig::default(), None, today()).unwrap();
        assert_eq!(report.images, None);
        assert_eq!(report.sitemap, None);
        assert!(!ws.output.join("sitemap.xml").exists());
    }

    #[test]
    fn standalone_stages_share_the_persisted_table() {
        let (_tmp, ws, donor) = setup();
        let config = RunConfig::default();
        run_prepare(&donor, &ws, &config).unwrap();
        let consolidated = run_consolidate(&ws, &config).unwrap();
        assert_eq!(consolidated.stats.moved, 1);

        let stats = run_rewrite(&ws, &config).unwrap();
        assert_eq!(stats.pages, 2);
        assert!(read(&ws.output, "index.html").contains("assets/images/logo.png"));

        // A second consolidation over the output changes nothing.
        let again = run_consolidate(&ws, &config).unwrap();
        assert_eq!(again.stats, assets::ConsolidateStats::default());
    }

    #[test]
    fn check_reports_without_mutating() {
        let (_tmp, _ws, donor) = setup();
        let before = list_files(&donor);
        let report = check(&donor).unwrap();
        assert_eq!(report.domain_root.as_deref(), Some("web/site.example"));
        assert_eq!(report.files, 4);
        assert_eq!(report.pages, 2);
        assert_eq!(
            report.plan.get(&AssetClass::Image),
            Some(&vec!["web/site.example/img/logo.png".to_string()])
        );
        assert_eq!(list_files(&donor), before);
    }
}
