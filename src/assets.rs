//! Asset consolidation and deduplication.
//!
//! Archive dumps scatter the same stylesheet, script or logo across dozens of
//! directories, often under names mangled by the crawler (`style.css@ver=5.2`,
//! `logo (1).png`). This stage gathers every resource into one canonical
//! directory per [`AssetClass`] and keeps exactly one copy of each distinct
//! content.
//!
//! # Algorithm
//!
//! 1. **Relocate.** Every file whose (normalized) name classifies into a class
//!    and that is not already inside that class's directory is moved to
//!    `assets/<class>/<original name>` through
//!    [`place_file`](crate::relocate::place_file). Names are never rewritten at
//!    this point.
//! 2. **Deduplicate.** Per class directory, all files are hashed (in parallel)
//!    and then visited in lexicographic order of their relative path. The first
//!    file presenting a digest is canonical; later ones are deleted and their
//!    keys alias the canonical path.
//! 3. **Tabulate.** The surviving files and the aliases of deleted ones become
//!    the [`ResourceTable`].
//!
//! # Keys
//!
//! Every file contributes two keys, both case-folded:
//!
//! - its exact file name (`style.css@ver=5.2`)
//! - its [normalized key](normalize_key) (`style.css`)
//!
//! Exact names always win over normalized aliases; among aliases the first in
//! processing order wins.
//!
//! # Persistence
//!
//! The table is written as `resources.json` into the temp directory so the
//! rewrite stage (and a later consolidation of the same tree) can pick it up.
//! Loading an older or corrupt file yields `None`, never an error.

use crate::digest;
use crate::paths;
use crate::relocate::{ConflictPolicy, Placement, place_file};
use crate::types::{ASSETS_DIR, AssetClass, ResourceRecord};
use percent_encoding::percent_decode_str;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Name of the persisted table within the temp directory.
const TABLE_FILENAME: &str = "resources.json";

/// Bump to invalidate persisted tables when the key computation changes.
const TABLE_VERSION: u32 = 1;

/// Percent-decoded, case-folded basename with version/query suffixes removed.
///
/// ```text
/// Style.CSS?ver=5.2         → style.css
/// style.css@ver=5.2         → style.css
/// jquery.min.js%3Fver=3.6   → jquery.min.js
/// logo@2x.png               → logo@2x.png   (no `=`, not a query)
/// ```
pub fn normalize_key(name: &str) -> String {
    normalize_decoded_key(&percent_decode_str(name).decode_utf8_lossy())
}

/// [`normalize_key`] for a name that was already percent-decoded.
pub fn normalize_decoded_key(name: &str) -> String {
    let mut key = name.trim().to_lowercase();
    if let Some(pos) = key.find('?') {
        key.truncate(pos);
    }
    while let Some(pos) = key.rfind('@') {
        if key[pos..].contains('=') {
            key.truncate(pos);
        } else {
            break;
        }
    }
    key
}

/// Class of a file name as found on disk (suffixes tolerated).
pub fn classify(name: &str) -> Option<AssetClass> {
    AssetClass::from_name(&normalize_key(name))
}

// ============================================================================
// Resource Table
// ============================================================================

/// Per-class mapping from case-folded key to canonical site-relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTable {
    version: u32,
    image: BTreeMap<String, String>,
    css: BTreeMap<String, String>,
    js: BTreeMap<String, String>,
    font: BTreeMap<String, String>,
    /// Runtime reverse index: case-folded canonical path → canonical path.
    /// Rebuilt on load, maintained on insert. Never serialized.
    #[serde(skip)]
    canonical: HashMap<String, String>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self {
            version: TABLE_VERSION,
            ..Self::default()
        }
    }

    fn map(&self, class: AssetClass) -> &BTreeMap<String, String> {
        match class {
            AssetClass::Image => &self.image,
            AssetClass::Css => &self.css,
            AssetClass::Js => &self.js,
            AssetClass::Font => &self.font,
        }
    }

    fn map_mut(&mut self, class: AssetClass) -> &mut BTreeMap<String, String> {
        match class {
            AssetClass::Image => &mut self.image,
            AssetClass::Css => &mut self.css,
            AssetClass::Js => &mut self.js,
            AssetClass::Font => &mut self.font,
        }
    }

    /// Insert or replace a key.
    pub fn insert(&mut self, class: AssetClass, key: &str, path: &str) {
        self.canonical.insert(path.to_lowercase(), path.to_string());
        self.map_mut(class).insert(key.to_lowercase(), path.to_string());
    }

    /// Insert a key only if it is not mapped yet.
    pub fn insert_alias(&mut self, class: AssetClass, key: &str, path: &str) {
        let key = key.to_lowercase();
        if key.is_empty() || self.map(class).contains_key(&key) {
            return;
        }
        self.canonical.insert(path.to_lowercase(), path.to_string());
        self.map_mut(class).insert(key, path.to_string());
    }

    /// Look up a key within one class, case-insensitively.
    pub fn get(&self, class: AssetClass, key: &str) -> Option<&str> {
        self.map(class).get(&key.to_lowercase()).map(String::as_str)
    }

    /// Look up a referenced file name: normalized key first, then the exact name.
    ///
    /// References reach the table already percent-decoded, so the name is not
    /// decoded again: `a%2520b.png` means the file `a%20b.png`, not `a b.png`.
    /// The class is inferred from the name; unclassifiable names never match.
    pub fn lookup_name(&self, name: &str) -> Option<&str> {
        let key = normalize_decoded_key(name);
        let class = AssetClass::from_name(&key)?;
        self.get(class, &key).or_else(|| self.get(class, name))
    }

    /// Match a full site-relative path against the canonical paths.
    pub fn lookup_path(&self, path: &str) -> Option<&str> {
        self.canonical.get(&path.to_lowercase()).map(String::as_str)
    }

    /// Number of keys (not files) for a class.
    pub fn len(&self, class: AssetClass) -> usize {
        self.map(class).len()
    }

    pub fn is_empty(&self) -> bool {
        AssetClass::ALL.iter().all(|c| self.map(*c).is_empty())
    }

    /// Iterate `(key, canonical path)` pairs of one class in key order.
    pub fn iter(&self, class: AssetClass) -> impl Iterator<Item = (&str, &str)> {
        self.map(class)
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Load from the temp directory. Returns `None` if the file is missing,
    /// unreadable, or written by an incompatible version.
    pub fn load(dir: &Path) -> Option<Self> {
        let content = fs::read_to_string(dir.join(TABLE_FILENAME)).ok()?;
        let mut table: Self = match serde_json::from_str(&content) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable resource table");
                return None;
            }
        };
        if table.version != TABLE_VERSION {
            return None;
        }
        table.canonical = AssetClass::ALL
            .iter()
            .flat_map(|c| table.map(*c).values())
            .map(|p| (p.to_lowercase(), p.clone()))
            .collect();
        Some(table)
    }

    /// Save to the temp directory.
    pub fn save(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(TABLE_FILENAME), json)
    }
}

/// Path of the persisted table inside a temp directory.
pub fn table_path(dir: &Path) -> PathBuf {
    dir.join(TABLE_FILENAME)
}

// ============================================================================
// Consolidation
// ============================================================================

/// Counters for one consolidation run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsolidateStats {
    pub moved: usize,
    /// Files removed because an identical copy already existed.
    pub duplicates: usize,
    /// Name collisions with different content, handled by the conflict policy.
    pub conflicts: usize,
    /// Moves, deletes or reads that failed and were skipped.
    pub failures: usize,
}

/// Result of [`consolidate`].
#[derive(Debug, Clone)]
pub struct Consolidation {
    pub table: ResourceTable,
    /// One record per surviving file, ordered by class then path.
    pub records: Vec<ResourceRecord>,
    pub stats: ConsolidateStats,
}

/// Gather, deduplicate and tabulate every resource under `root`.
///
/// `seed` is a table from a previous run over the same tree; its keys are kept
/// as aliases as long as their target still survives, which makes a second run
/// over the output a fixed point.
///
/// Only failing to create the canonical directories is an error; per-file
/// failures are logged and counted.
pub fn consolidate(
    root: &Path,
    policy: ConflictPolicy,
    seed: Option<&ResourceTable>,
) -> io::Result<Consolidation> {
    for class in AssetClass::ALL {
        fs::create_dir_all(root.join(class.canonical_dir()))?;
    }

    let mut stats = ConsolidateStats::default();
    relocate_all(root, policy, &mut stats);

    let mut table = ResourceTable::new();
    let mut records = Vec::new();
    for class in AssetClass::ALL {
        dedupe_class(root, class, seed, &mut table, &mut records, &mut stats);
    }

    info!(
        moved = stats.moved,
        duplicates = stats.duplicates,
        conflicts = stats.conflicts,
        failures = stats.failures,
        "consolidation finished"
    );
    Ok(Consolidation {
        table,
        records,
        stats,
    })
}

/// Preview of what [`consolidate`] would gather, without touching anything.
///
/// Returns the site-relative paths of every classifiable file outside its
/// canonical directory, grouped by class.
pub fn plan(root: &Path) -> BTreeMap<AssetClass, Vec<String>> {
    let mut plan: BTreeMap<AssetClass, Vec<String>> = BTreeMap::new();
    for (rel, class) in relocation_candidates(root) {
        plan.entry(class).or_default().push(rel);
    }
    plan
}

/// Files that need moving, sorted by relative path.
fn relocation_candidates(root: &Path) -> Vec<(String, AssetClass)> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = paths::rel_to_root(root, entry.path()) else {
            continue;
        };
        let Some(class) = classify(&entry.file_name().to_string_lossy()) else {
            continue;
        };
        let home = format!("{}/", class.canonical_dir());
        if rel.starts_with(&home) {
            continue;
        }
        out.push((rel, class));
    }
    out
}

fn relocate_all(root: &Path, policy: ConflictPolicy, stats: &mut ConsolidateStats) {
    for (rel, class) in relocation_candidates(root) {
        let src = root.join(&rel);
        let name = paths::basename(&rel);
        let dst = root.join(class.canonical_dir()).join(name);
        match place_file(&src, &dst, policy) {
            Ok(Placement::Moved(_)) => {
                stats.moved += 1;
                debug!(file = %rel, class = %class, "moved");
            }
            Ok(Placement::DuplicateDropped(_)) => stats.duplicates += 1,
            Ok(Placement::Kept(_) | Placement::Overwrote(_) | Placement::Renamed(_)) => {
                stats.conflicts += 1;
            }
            Err(e) => {
                stats.failures += 1;
                warn!(file = %rel, error = %e, "could not move resource, leaving it in place");
            }
        }
    }
}

/// A file inside a class directory with its digest (if it could be read).
struct Hashed {
    rel: String,
    name: String,
    digest: Option<String>,
}

fn dedupe_class(
    root: &Path,
    class: AssetClass,
    seed: Option<&ResourceTable>,
    table: &mut ResourceTable,
    records: &mut Vec<ResourceRecord>,
    stats: &mut ConsolidateStats,
) {
    let dir = root.join(class.canonical_dir());
    let mut files: Vec<String> = WalkDir::new(&dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| paths::rel_to_root(root, e.path()))
        .collect();
    files.sort();

    let hashed: Vec<Hashed> = files
        .into_par_iter()
        .map(|rel| {
            let digest = match digest::hash_file(&root.join(&rel)) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!(file = %rel, error = %e, "could not hash, keeping as unique");
                    None
                }
            };
            let name = paths::basename(&rel).to_string();
            Hashed { rel, name, digest }
        })
        .collect();

    let mut seen: HashMap<&str, &str> = HashMap::new();
    let mut survivors: Vec<&Hashed> = Vec::new();
    let mut removed: Vec<(&Hashed, &str)> = Vec::new();

    for file in &hashed {
        let Some(digest) = file.digest.as_deref() else {
            survivors.push(file);
            continue;
        };
        let Some(&canonical) = seen.get(digest) else {
            seen.insert(digest, &file.rel);
            survivors.push(file);
            continue;
        };
        match fs::remove_file(root.join(&file.rel)) {
            Ok(()) => {
                stats.duplicates += 1;
                info!(file = %file.rel, canonical = %canonical, "duplicate removed");
                removed.push((file, canonical));
            }
            Err(e) => {
                stats.failures += 1;
                warn!(file = %file.rel, error = %e, "could not remove duplicate");
                survivors.push(file);
            }
        }
    }

    // Exact names first: they describe files that really carried that name.
    for file in &survivors {
        table.insert(class, &file.name, &file.rel);
    }
    for (file, canonical) in &removed {
        table.insert(class, &file.name, canonical);
    }
    if let Some(seed) = seed {
        for (key, path) in seed.iter(class) {
            if table.lookup_path(path).is_some() {
                table.insert_alias(class, key, path);
            }
        }
    }
    for file in &survivors {
        table.insert_alias(class, &normalize_key(&file.name), &file.rel);
    }
    for (file, canonical) in &removed {
        table.insert_alias(class, &normalize_key(&file.name), canonical);
    }

    records.extend(survivors.iter().map(|file| ResourceRecord {
        original_name: file.name.clone(),
        normalized_key: normalize_key(&file.name),
        class,
        content_digest: file.digest.clone().unwrap_or_default(),
        canonical_path: file.rel.clone(),
    }));
}

/// Whether a site-relative path lies inside the canonical asset tree.
pub fn is_canonical_asset_path(rel: &str) -> bool {
    rel == ASSETS_DIR || rel.starts_with(&format!("{ASSETS_DIR}/"))
}
