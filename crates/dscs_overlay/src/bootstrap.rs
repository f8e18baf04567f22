//! On-demand extraction of base-game resources.
//!
//! Tables touched by a mod are seeded from the base game's copy, and scripts
//! are decompiled so there is a baseline to diff against. Neither ships with
//! the mod manager, so the [`Bootstrapper`] pulls whatever the active mods need
//! out of the game's archives into the [`ResourceCache`] the first time it is
//! asked for. Once cached, a resource is never fetched again.
//!
//! Only base tables feed the build. Mods ship whole script sources, so the
//! merger never reads the decompiled base scripts; they stay in the cache as a
//! reference for mod authors to diff their sources against.

use crate::cache::{Resource, ResourceCache};
use crate::codec::{ArchiveCodec, ScriptToolchain};
use crate::error::{Error, Result};
use crate::filelist::{ArchiveKind, FileList};
use crate::index::{table_of, Category, ModIndex, SCRIPT_ARCHIVE_DIR};
use crate::progress::EventSink;
use crate::utils::{remove_if_exists, VirtualPath};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Resources bootstrapped on every run, regardless of which mods are active.
///
/// ```json
/// { "tables": ["data/chara.mbe"], "scripts": ["script64/t1001.nut"] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapManifest {
    #[serde(default)]
    pub tables: Vec<VirtualPath>,
    #[serde(default)]
    pub scripts: Vec<VirtualPath>,
}

impl BootstrapManifest {
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_std_path())?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn resources(&self) -> impl Iterator<Item = Resource> + '_ {
        let tables = self.tables.iter().cloned().map(Resource::Table);
        let scripts = self
            .scripts
            .iter()
            .map(|script| Resource::Script(script.with_extension("nut")));
        tables.chain(scripts)
    }
}

/// Where the pristine archives can be read from.
#[derive(Debug, Clone)]
pub struct ArchiveOrigins {
    pub game_resources_dir: Utf8PathBuf,
    pub backups_dir: Utf8PathBuf,
}

impl ArchiveOrigins {
    pub fn new(game_resources_dir: impl Into<Utf8PathBuf>, backups_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            game_resources_dir: game_resources_dir.into(),
            backups_dir: backups_dir.into(),
        }
    }

    pub fn live_archive(&self, kind: ArchiveKind) -> Utf8PathBuf {
        self.game_resources_dir.join(kind.packed_file_name())
    }

    pub fn backup_archive(&self, kind: ArchiveKind) -> Utf8PathBuf {
        self.backups_dir.join(kind.packed_file_name())
    }

    /// Directory to read `kind` from.
    ///
    /// The backup is preferred because the live archive may already carry a
    /// previous patch.
    pub fn resolve(&self, kind: ArchiveKind) -> Result<Utf8PathBuf> {
        if self.backup_archive(kind).as_std_path().is_file() {
            return Ok(self.backups_dir.clone());
        }
        if self.live_archive(kind).as_std_path().is_file() {
            return Ok(self.game_resources_dir.clone());
        }
        Err(Error::bootstrap(
            kind.packed_file_name(),
            Error::Other(format!(
                "archive not found in {} or {}",
                self.backups_dir, self.game_resources_dir
            )),
        ))
    }
}

/// Outcome of a [`Bootstrapper::bootstrap`] call.
#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    pub required: usize,
    pub already_cached: usize,
    pub fetched_tables: Vec<VirtualPath>,
    pub fetched_scripts: Vec<VirtualPath>,
    /// Resources no base archive ships; they have no baseline.
    pub unknown: Vec<Resource>,
}

impl BootstrapReport {
    pub fn fetched(&self) -> usize {
        self.fetched_tables.len() + self.fetched_scripts.len()
    }
}

/// Every base resource the given mods depend on, plus the manifest's.
pub fn required_resources(indices: &[ModIndex], manifest: &BootstrapManifest) -> BTreeSet<Resource> {
    let mut required: BTreeSet<Resource> = manifest.resources().collect();

    for index in indices {
        for (path, _) in index.entries(Category::Table) {
            if let Some(table) = table_of(path) {
                required.insert(Resource::Table(table));
            }
        }
        for (path, _) in index.entries(Category::ScriptSrc) {
            if path.components().next() == Some(SCRIPT_ARCHIVE_DIR) {
                required.insert(Resource::Script(path.with_extension("nut")));
            }
        }
    }

    required
}

#[derive(Clone)]
pub struct Bootstrapper {
    codec: Arc<dyn ArchiveCodec>,
    toolchain: Arc<dyn ScriptToolchain>,
    cache: ResourceCache,
    file_list: Arc<FileList>,
    manifest: BootstrapManifest,
    origins: ArchiveOrigins,
    events: EventSink,
}

impl Bootstrapper {
    pub fn new(
        codec: Arc<dyn ArchiveCodec>,
        toolchain: Arc<dyn ScriptToolchain>,
        cache: ResourceCache,
        file_list: Arc<FileList>,
        origins: ArchiveOrigins,
    ) -> Self {
        Self {
            codec,
            toolchain,
            cache,
            file_list,
            manifest: BootstrapManifest::default(),
            origins,
            events: EventSink::silent(),
        }
    }

    pub fn with_manifest(mut self, manifest: BootstrapManifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn origins(&self) -> &ArchiveOrigins {
        &self.origins
    }

    /// Fetch every resource the mods need that the cache does not hold yet.
    pub fn bootstrap(&self, indices: &[ModIndex]) -> Result<BootstrapReport> {
        let required = required_resources(indices, &self.manifest);
        let mut report = BootstrapReport {
            required: required.len(),
            ..Default::default()
        };

        let mut missing: BTreeMap<ArchiveKind, Vec<Resource>> = BTreeMap::new();
        for resource in required {
            if self.cache.has(&resource) {
                report.already_cached += 1;
                continue;
            }
            match self.file_list.archive_for(resource.archive_path()) {
                Some(kind) => missing.entry(kind).or_default().push(resource),
                None => {
                    tracing::debug!("{} is not in the file list, nothing to bootstrap", resource);
                    report.unknown.push(resource);
                }
            }
        }

        if missing.is_empty() {
            tracing::info!(
                "Bootstrap cache is warm ({} cached, {} without baseline)",
                report.already_cached,
                report.unknown.len()
            );
            return Ok(report);
        }

        let scratch = self.cache.scratch_dir();
        remove_if_exists(&scratch)?;

        for (kind, resources) in missing {
            let origin = self.origins.resolve(kind)?;
            self.events.log(format!(
                "Bootstrapping {} resources from {}...",
                resources.len(),
                origin.join(kind.packed_file_name())
            ));

            let total = resources.len();
            for (i, resource) in resources.into_iter().enumerate() {
                self.fetch(kind, &origin, &resource)
                    .map_err(|e| Error::bootstrap(&resource, e))?;
                self.events
                    .update(format!("Bootstrapped {}/{} [{}]", i + 1, total, resource));

                match resource {
                    Resource::Table(path) => report.fetched_tables.push(path),
                    Resource::Script(path) => report.fetched_scripts.push(path),
                }
            }
        }

        remove_if_exists(&scratch)?;

        tracing::info!(
            "Bootstrapped tables={} scripts={} (cached={}, unknown={})",
            report.fetched_tables.len(),
            report.fetched_scripts.len(),
            report.already_cached,
            report.unknown.len()
        );
        Ok(report)
    }

    /// Extract one resource into the cache.
    ///
    /// Output is staged under the scratch directory and renamed into place, so a
    /// failed fetch never leaves something that [`ResourceCache::has`] accepts.
    fn fetch(&self, kind: ArchiveKind, origin: &Utf8Path, resource: &Resource) -> Result<()> {
        let scratch = self.cache.scratch_dir();
        let staging = scratch.join("staged");
        remove_if_exists(&staging)?;
        std::fs::create_dir_all(staging.as_std_path())?;

        let extracted = self
            .codec
            .extract_entry(kind, resource.archive_path(), origin, &scratch.join("extracted"))?;
        let target = self.cache.location(resource);

        let staged = match resource {
            Resource::Table(_) => {
                self.codec.unpack_table(&extracted, &staging)?;
                remove_if_exists(&extracted)?;
                staging.join(resource.archive_path().file_name())
            }
            Resource::Script(path) => {
                let name = path.file_name();
                let extracted_dir = extracted
                    .parent()
                    .ok_or_else(|| Error::InvalidPath(extracted.to_string()))?;
                self.toolchain
                    .decompile_script(name, extracted_dir, &staging, true)?;
                staging.join(crate::codec::swap_extension(name, "txt"))
            }
        };

        if !staged.as_std_path().exists() {
            return Err(Error::Other(format!("no output produced for {}", resource)));
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent.as_std_path())?;
        }
        std::fs::rename(staged.as_std_path(), target.as_std_path())?;
        remove_if_exists(&staging)?;

        tracing::debug!("Cached {} at {}", resource, target);
        Ok(())
    }

    /// The unpacked base archive, unpacking it into the cache on first use.
    pub fn ensure_archive(&self, kind: ArchiveKind) -> Result<Utf8PathBuf> {
        let target = self.cache.archive_dir(kind);
        if target.as_std_path().is_dir() {
            tracing::debug!("Using cached {}", target);
            return Ok(target);
        }

        let origin = self.origins.resolve(kind)?;
        self.events.log(format!(
            "Unpacking {} (first run only)...",
            origin.join(kind.packed_file_name())
        ));

        let scratch = self.cache.scratch_dir();
        let unpack = || -> Result<()> {
            remove_if_exists(&scratch)?;
            std::fs::create_dir_all(scratch.as_std_path())?;
            self.codec.unpack(kind, &origin, &scratch)?;
            std::fs::rename(
                scratch.join(kind.unpacked_dir_name()).as_std_path(),
                target.as_std_path(),
            )?;
            remove_if_exists(&scratch)
        };
        unpack().map_err(|e| Error::bootstrap(kind.name(), e))?;

        Ok(target)
    }
}
