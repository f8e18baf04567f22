//! Merging mod indices into a single patch tree.
//!
//! Ownership is decided per archive output, the file that finally lands in
//! the game's archive: a script source owns its compiled `.nut`, the sheets of
//! a table own the packed `<name>.mbe`, and a loose file owns its own path.
//! Paths are compared case-insensitively and written with the first casing
//! seen. When several mods produce the same output, the later one in
//! activation order wins; what else happens is decided by the
//! [`ConflictPolicy`] passed to [`PatchMerger::new`].
//!
//! Table sheets merge one level deeper. Mods editing different sheets of the
//! same table are combined, and only edits to the same sheet collide. A loose
//! packed table drops the sheet edits of mods activated before it. Sheet edits
//! from later mods drop it in turn and are applied to the base table.

use crate::cache::ResourceCache;
use crate::error::{Error, Result};
use crate::index::{table_of, Category, ModIndex, TableKind};
use crate::utils::{copy_dir_all, copy_file, remove_if_exists, VirtualPath};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Archive-namespace overlay directory under the output directory.
pub const PATCH_DIR: &str = "patch";
/// Table-source working tree under the output directory.
pub const PATCH_TABLES_DIR: &str = "patch_mbe";
/// Script-source working tree under the output directory.
pub const PATCH_SCRIPTS_DIR: &str = "patch_scripts";

/// The merged overlay, rooted at the output directory.
///
/// ```text
/// output/
///   patch/          # loose files, later packed tables and compiled .nut files
///   patch_mbe/      # <kind>/<name>.mbe/<sheet> table sources
///   patch_scripts/  # script64/<name>.txt script sources
/// ```
#[derive(Debug, Clone)]
pub struct PatchTree {
    root: Utf8PathBuf,
}

impl PatchTree {
    pub fn new(output_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: output_dir.into(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn patch_dir(&self) -> Utf8PathBuf {
        self.root.join(PATCH_DIR)
    }

    pub fn tables_dir(&self) -> Utf8PathBuf {
        self.root.join(PATCH_TABLES_DIR)
    }

    pub fn scripts_dir(&self) -> Utf8PathBuf {
        self.root.join(PATCH_SCRIPTS_DIR)
    }

    /// Source tree of one table family, e.g. `patch_mbe/data`.
    pub fn table_kind_dir(&self, kind: TableKind) -> Utf8PathBuf {
        self.tables_dir().join(kind.dir_name())
    }

    pub fn exists(&self) -> bool {
        self.patch_dir().as_std_path().is_dir()
    }

    /// Remove all working trees.
    pub fn clear(&self) -> Result<()> {
        remove_if_exists(&self.patch_dir())?;
        remove_if_exists(&self.tables_dir())?;
        remove_if_exists(&self.scripts_dir())
    }

    /// Remove and recreate all working trees.
    pub fn reset(&self) -> Result<()> {
        self.clear()?;
        for dir in [self.patch_dir(), self.tables_dir(), self.scripts_dir()] {
            std::fs::create_dir_all(dir.as_std_path())?;
        }
        Ok(())
    }
}

/// What the merger does when more than one mod replaces the same path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// The later mod wins silently.
    #[default]
    LastWriterWins,
    /// The later mod wins; the collision is logged and reported.
    ReportConflict,
    /// Any collision fails the merge.
    Reject,
}

/// A path replaced by more than one mod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// The archive output, or `<table>/<sheet>` for a sheet edited twice.
    pub path: VirtualPath,
    /// Contributing mods in activation order.
    pub contributing_mods: Vec<String>,
    pub winner: String,
}

#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Mod files copied into the tree. Files that lost to a later mod are not copied.
    pub files_written: usize,
    /// Base sheets copied in from the cache before mods were applied.
    pub seeded_sheets: usize,
    pub conflicts: Vec<Conflict>,
}

/// How an indexed file reaches the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Producer {
    Loose,
    Script,
    Table,
}

/// The archive output an indexed file produces, and how.
fn archive_output(category: Category, path: &VirtualPath) -> (VirtualPath, Producer) {
    match category {
        Category::ScriptSrc if is_script_source(path) => {
            (path.with_extension("nut"), Producer::Script)
        }
        Category::Table => match table_of(path) {
            Some(table) => (table, Producer::Table),
            None => (path.clone(), Producer::Loose),
        },
        _ => (path.clone(), Producer::Loose),
    }
}

fn is_script_source(path: &VirtualPath) -> bool {
    path.file_name()
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("txt"))
}

/// Consecutive files one mod feeds into one output.
#[derive(Debug)]
struct Contribution<'a> {
    mod_pos: usize,
    producer: Producer,
    /// `(indexed path, source file)`; one per sheet for tables.
    files: Vec<(&'a VirtualPath, &'a Utf8Path)>,
}

#[derive(Debug)]
struct Output<'a> {
    /// Casing of the first mod that produced it.
    path: VirtualPath,
    contributions: Vec<Contribution<'a>>,
}

impl<'a> Output<'a> {
    fn add(&mut self, mod_pos: usize, producer: Producer, path: &'a VirtualPath, source: &'a Utf8Path) {
        match self.contributions.last_mut() {
            Some(last) if last.mod_pos == mod_pos && last.producer == producer => {
                last.files.push((path, source));
            }
            _ => self.contributions.push(Contribution {
                mod_pos,
                producer,
                files: vec![(path, source)],
            }),
        }
    }

    /// Contributions that end up in the tree: the winner alone, or for a table
    /// every sheet edit after the last whole-file replacement.
    fn survivors(&self) -> &[Contribution<'a>] {
        let Some(winner) = self.contributions.last() else {
            return &[];
        };
        let start = if winner.producer == Producer::Table {
            self.contributions
                .iter()
                .rposition(|c| c.producer != Producer::Table)
                .map_or(0, |i| i + 1)
        } else {
            self.contributions.len() - 1
        };
        &self.contributions[start..]
    }

    /// Whether any contribution replaces the output as a whole.
    fn has_whole_file(&self) -> bool {
        self.contributions.iter().any(|c| c.producer != Producer::Table)
    }
}

/// Distinct mod ids at `positions`, in activation order.
fn mod_ids(indices: &[ModIndex], positions: impl IntoIterator<Item = usize>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let mut last = None;
    for pos in positions {
        if last != Some(pos) {
            ids.push(indices[pos].mod_id().to_string());
            last = Some(pos);
        }
    }
    ids
}

/// Sheets of a table keyed case-insensitively, with their edits in activation order.
fn sheet_edits<'a>(survivors: &[Contribution<'a>]) -> BTreeMap<String, (String, Vec<(usize, &'a Utf8Path)>)> {
    let mut sheets: BTreeMap<String, (String, Vec<(usize, &'a Utf8Path)>)> = BTreeMap::new();
    for contribution in survivors {
        for &(path, source) in &contribution.files {
            let name = path.file_name();
            sheets
                .entry(name.to_ascii_lowercase())
                .or_insert_with(|| (name.to_string(), Vec::new()))
                .1
                .push((contribution.mod_pos, source));
        }
    }
    sheets
}

/// Map of lowercase file name to actual file name for the files in `dir`.
fn existing_names(dir: &Utf8Path) -> Result<BTreeMap<String, String>> {
    let mut names = BTreeMap::new();
    if !dir.as_std_path().is_dir() {
        return Ok(names);
    }
    for entry in dir.read_dir_utf8()? {
        let name = entry?.file_name().to_string();
        names.insert(name.to_ascii_lowercase(), name);
    }
    Ok(names)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PatchMerger {
    policy: ConflictPolicy,
}

impl PatchMerger {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Merge `indices` (lowest priority first) into `tree`.
    pub fn merge(
        &self,
        indices: &[ModIndex],
        cache: &ResourceCache,
        tree: &PatchTree,
    ) -> Result<MergeReport> {
        if indices.is_empty() {
            return Err(Error::NoActiveMods);
        }

        // Ownership is settled before any write so that a rejected merge leaves
        // the output directory alone.
        let mut outputs: BTreeMap<String, Output> = BTreeMap::new();
        for (mod_pos, index) in indices.iter().enumerate() {
            for (category, path, source) in index.iter() {
                let (output, producer) = archive_output(category, path);
                outputs
                    .entry(output.lookup_key())
                    .or_insert_with(|| Output {
                        path: output,
                        contributions: Vec::new(),
                    })
                    .add(mod_pos, producer, path, source);
            }
        }

        let mut collisions: Vec<(VirtualPath, Vec<String>)> = Vec::new();
        for output in outputs.values() {
            let mods = mod_ids(indices, output.contributions.iter().map(|c| c.mod_pos));
            if output.has_whole_file() && mods.len() > 1 {
                collisions.push((output.path.clone(), mods));
            }

            let survivors = output.survivors();
            if survivors.last().map(|c| c.producer) == Some(Producer::Table) {
                for (name, edits) in sheet_edits(survivors).into_values() {
                    let mods = mod_ids(indices, edits.iter().map(|(pos, _)| *pos));
                    if mods.len() > 1 {
                        collisions.push((output.path.join(&name)?, mods));
                    }
                }
            }
        }

        let mut report = MergeReport::default();
        for (path, mods) in collisions {
            let winner = mods.last().cloned().unwrap_or_default();
            match self.policy {
                ConflictPolicy::Reject => {
                    return Err(Error::MergeConflict { path, mods });
                }
                ConflictPolicy::ReportConflict => {
                    tracing::warn!("Conflict on {}: [{}], {} wins", path, mods.join(", "), winner);
                    report.conflicts.push(Conflict {
                        path,
                        contributing_mods: mods,
                        winner,
                    });
                }
                ConflictPolicy::LastWriterWins => {
                    tracing::debug!("{} overridden by {}", path, winner);
                }
            }
        }

        tree.reset()?;

        for output in outputs.values() {
            let survivors = output.survivors();
            match survivors.last() {
                Some(winner) if winner.producer == Producer::Table => {
                    self.write_table(&output.path, survivors, cache, tree, &mut report)?;
                }
                Some(winner) => {
                    let Some((_, source)) = winner.files.last() else {
                        continue;
                    };
                    let target = match winner.producer {
                        Producer::Script => output.path.with_extension("txt").to_fs_path(&tree.scripts_dir()),
                        _ => output.path.to_fs_path(&tree.patch_dir()),
                    };
                    copy_file(source, &target)?;
                    report.files_written += 1;
                }
                None => {}
            }
        }

        tracing::info!(
            "Merged {} mods: files={} seeded_sheets={} conflicts={}",
            indices.len(),
            report.files_written,
            report.seeded_sheets,
            report.conflicts.len()
        );

        Ok(report)
    }

    /// Seed `table` from the cache, then apply the surviving sheet edits.
    fn write_table(
        &self,
        table: &VirtualPath,
        survivors: &[Contribution<'_>],
        cache: &ResourceCache,
        tree: &PatchTree,
        report: &mut MergeReport,
    ) -> Result<()> {
        let table_dir = table.to_fs_path(&tree.tables_dir());
        let base = cache.table_dir(table);
        if base.as_std_path().is_dir() {
            let seeded = copy_dir_all(&base, &table_dir)?;
            tracing::debug!("Seeded {} with {} base sheets", table, seeded);
            report.seeded_sheets += seeded;
        } else {
            tracing::debug!("No base table for {}, using mod sheets only", table);
        }

        // Keep the base casing so an edit replaces its sheet instead of adding a twin.
        let names = existing_names(&table_dir)?;
        for (key, (name, edits)) in sheet_edits(survivors) {
            let name = names.get(&key).unwrap_or(&name);
            if let Some((_, source)) = edits.last() {
                copy_file(source, &table_dir.join(name))?;
                report.files_written += 1;
            }
        }
        Ok(())
    }
}
