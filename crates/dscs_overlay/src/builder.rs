//! Main install orchestration.
//!
//! The [`ModInstaller`] drives the whole pipeline on the calling thread:
//!
//! 1. Emit `LockControls` and clean the outputs of any previous run.
//! 2. Build a [`ModIndex`] for every active mod, in activation order. No
//!    active mods is an error.
//! 3. Bootstrap the base resources those mods need into the [`ResourceCache`].
//! 4. Merge the indices into the [`PatchTree`] (later mods win).
//! 5. Pack tables and compile scripts in the tree, stage by stage.
//! 6. Rebuild, encrypt, back up and install the archive.
//! 7. Persist an [`InstallRecord`].
//!
//! Any failure aborts the run. A summary line is logged and `ReleaseControls`
//! is emitted on every exit path.

use crate::bootstrap::{ArchiveOrigins, BootstrapManifest, BootstrapReport, Bootstrapper};
use crate::cache::ResourceCache;
use crate::codec::{ArchiveCodec, ScriptToolchain};
use crate::error::{Error, Result};
use crate::filelist::{ArchiveKind, FileList};
use crate::index::ModIndex;
use crate::install::{clean_previous_outputs, ArchiveInstaller, InstalledArchive};
use crate::merge::{ConflictPolicy, MergeReport, PatchMerger, PatchTree};
use crate::pack::{PackPipeline, PipelineReport};
use crate::progress::{EventSink, InstallEvent};
use crate::state::{InstallRecord, INSTALL_RECORD_FILE};
use crate::utils::hash_file;
use camino::Utf8PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A mod to include in the install. Later mods in the list win conflicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMod {
    /// Identifier used in logs, conflict reports and the install record.
    pub id: String,
    /// Directory containing the mod's `modfiles/` content root.
    pub mod_dir: Utf8PathBuf,
}

impl ActiveMod {
    pub fn new(id: impl Into<String>, mod_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            id: id.into(),
            mod_dir: mod_dir.into(),
        }
    }

    /// Use the directory name as the id.
    pub fn from_dir(mod_dir: impl Into<Utf8PathBuf>) -> Self {
        let mod_dir = mod_dir.into();
        let id = mod_dir.file_name().unwrap_or(mod_dir.as_str()).to_string();
        Self { id, mod_dir }
    }
}

/// Directories the pipeline reads from and writes to.
#[derive(Debug, Clone)]
pub struct InstallPaths {
    /// The game's `resources/` directory holding the live archives.
    pub game_resources_dir: Utf8PathBuf,
    /// Working directory for the patch tree and the rebuilt archive.
    pub output_dir: Utf8PathBuf,
    /// Root of the base-resource cache.
    pub resources_dir: Utf8PathBuf,
    /// Where pristine copies of replaced archives are kept.
    pub backups_dir: Utf8PathBuf,
}

impl InstallPaths {
    pub fn record_path(&self) -> Utf8PathBuf {
        self.output_dir.join(INSTALL_RECORD_FILE)
    }

    pub fn origins(&self) -> ArchiveOrigins {
        ArchiveOrigins::new(&self.game_resources_dir, &self.backups_dir)
    }
}

/// Summary returned after a successful install.
#[derive(Debug)]
pub struct InstallResult {
    pub enabled_mods: Vec<String>,
    pub bootstrap: BootstrapReport,
    pub merge: MergeReport,
    pub pack: PipelineReport,
    pub archive: InstalledArchive,
    pub install_time: Duration,
}

/// Orchestrates index -> bootstrap -> merge -> pack -> install.
///
/// Create one with [`new`](Self::new), configure it with the `with_*` methods
/// and [`set_active_mods`](Self::set_active_mods), then call
/// [`install`](Self::install). The installer can be reconfigured and run again.
pub struct ModInstaller {
    paths: InstallPaths,
    codec: Arc<dyn ArchiveCodec>,
    toolchain: Arc<dyn ScriptToolchain>,
    active_mods: Vec<ActiveMod>,
    events: EventSink,
    workers: usize,
    conflict_policy: ConflictPolicy,
    file_list: Arc<FileList>,
    manifest: BootstrapManifest,
    target: ArchiveKind,
}

impl ModInstaller {
    pub fn new(
        paths: InstallPaths,
        codec: Arc<dyn ArchiveCodec>,
        toolchain: Arc<dyn ScriptToolchain>,
    ) -> Self {
        Self {
            paths,
            codec,
            toolchain,
            active_mods: Vec::new(),
            events: EventSink::silent(),
            workers: default_workers(),
            conflict_policy: ConflictPolicy::default(),
            file_list: Arc::new(FileList::default()),
            manifest: BootstrapManifest::default(),
            target: ArchiveKind::Dsdbp,
        }
    }

    /// Register a callback receiving every [`InstallEvent`].
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(InstallEvent) + Send + Sync + 'static,
    {
        self.events = EventSink::new(Arc::new(callback));
        self
    }

    /// Size of the pack stage worker pool.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_file_list(mut self, file_list: FileList) -> Self {
        self.file_list = Arc::new(file_list);
        self
    }

    pub fn with_manifest(mut self, manifest: BootstrapManifest) -> Self {
        self.manifest = manifest;
        self
    }

    /// Archive to rebuild. Defaults to `DSDBP`.
    pub fn with_target(mut self, target: ArchiveKind) -> Self {
        self.target = target;
        self
    }

    /// Set the ordered list of mods. Later entries override earlier ones.
    pub fn set_active_mods(&mut self, mods: Vec<ActiveMod>) {
        self.active_mods = mods;
    }

    pub fn paths(&self) -> &InstallPaths {
        &self.paths
    }

    /// Run the full pipeline.
    pub fn install(&self) -> Result<InstallResult> {
        self.events.lock_controls();
        let result = self.install_internal();
        if let Err(e) = &result {
            self.events.log(format!(
                "The following error occurred when trying to install modlist: {}",
                e
            ));
        }
        self.events.release_controls();
        result
    }

    /// Index the active mods and fill the resource cache, without building anything.
    pub fn bootstrap_only(&self) -> Result<BootstrapReport> {
        self.events.lock_controls();
        let result = self
            .index_mods()
            .and_then(|indices| self.bootstrapper().bootstrap(&indices));
        if let Err(e) = &result {
            self.events
                .log(format!("The following error occurred while bootstrapping: {}", e));
        }
        self.events.release_controls();
        result
    }

    fn install_internal(&self) -> Result<InstallResult> {
        let start_time = Instant::now();
        let output_dir = &self.paths.output_dir;
        let tree = PatchTree::new(output_dir);

        tracing::info!("Installing into {}", self.paths.game_resources_dir);
        tracing::info!("Output dir: {}", output_dir);
        tracing::info!("Active mods: {}", self.active_mods.len());

        self.events.log("Preparing to patch mods together...");
        clean_previous_outputs(output_dir, &tree, self.target)?;

        let indices = self.index_mods()?;
        let enabled_mods: Vec<String> = indices.iter().map(|i| i.mod_id().to_string()).collect();

        let bootstrapper = self.bootstrapper();
        let bootstrap = bootstrapper.bootstrap(&indices)?;

        self.events.log("Generating patch...");
        let merge = PatchMerger::new(self.conflict_policy).merge(&indices, bootstrapper.cache(), &tree)?;
        for conflict in &merge.conflicts {
            self.events.log(format!(
                "Conflict: {} is replaced by [{}], using {}",
                conflict.path,
                conflict.contributing_mods.join(", "),
                conflict.winner
            ));
        }

        let pipeline = PackPipeline::new(
            self.workers,
            Arc::clone(&self.codec),
            Arc::clone(&self.toolchain),
            self.events.clone(),
        )?;
        let pack = pipeline.run(&tree)?;

        let archive = ArchiveInstaller::new(Arc::clone(&self.codec), bootstrapper, output_dir)
            .with_target(self.target)
            .with_events(self.events.clone())
            .install(&tree)?;

        InstallRecord::new(self.target.name(), enabled_mods.clone(), archive.archive_hash)
            .save(&self.paths.record_path())?;

        self.events.log("Mods successfully installed.");

        Ok(InstallResult {
            enabled_mods,
            bootstrap,
            merge,
            pack,
            archive,
            install_time: start_time.elapsed(),
        })
    }

    fn index_mods(&self) -> Result<Vec<ModIndex>> {
        self.events.log("Indexing mods...");
        if self.active_mods.is_empty() {
            return Err(Error::NoActiveMods);
        }
        self.active_mods
            .iter()
            .map(|m| ModIndex::build(&m.id, &m.mod_dir))
            .collect()
    }

    fn bootstrapper(&self) -> Bootstrapper {
        Bootstrapper::new(
            Arc::clone(&self.codec),
            Arc::clone(&self.toolchain),
            ResourceCache::new(&self.paths.resources_dir),
            Arc::clone(&self.file_list),
            self.paths.origins(),
        )
        .with_manifest(self.manifest.clone())
        .with_events(self.events.clone())
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Whether the live archive under `game_resources_dir` is the one last installed.
pub fn installed_archive_is_current(paths: &InstallPaths, kind: ArchiveKind) -> Result<Option<bool>> {
    let Some(record) = InstallRecord::load(&paths.record_path())? else {
        return Ok(None);
    };
    let live = paths.origins().live_archive(kind);
    if !live.as_std_path().is_file() {
        return Ok(Some(false));
    }
    Ok(Some(record.matches(hash_file(&live)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        decode_archive, encode_table, init_tracing, utf8_tempdir, write_archive, write_file,
        FakeCodec, FakeToolchain, NUT_MAGIC,
    };
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::Mutex;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
        paths: InstallPaths,
        original: Vec<u8>,
        mods: Vec<ActiveMod>,
    }

    fn fixture() -> Fixture {
        init_tracing();
        let (dir, root) = utf8_tempdir();

        let sheets: BTreeMap<String, Vec<u8>> = [
            ("Sheet1.csv".to_string(), b"base-1".to_vec()),
            ("Sheet2.csv".to_string(), b"base-2".to_vec()),
        ]
        .into_iter()
        .collect();
        let table = encode_table(&sheets);
        let script = [NUT_MAGIC, b"base-bar".as_slice()].concat();
        let live = write_archive(
            &root.join("game"),
            ArchiveKind::Dsdbp,
            &[
                ("images/title.img", b"base-title"),
                ("data/foo.mbe", &table),
                ("script64/bar.nut", &script),
            ],
        );
        let original = fs::read(live).unwrap();

        let mod_a = root.join("mods/mod-a/modfiles");
        write_file(&mod_a.join("mbe/data/foo.mbe/Sheet1.csv"), b"A-1");
        write_file(&mod_a.join("script_src/bar.txt"), b"A-bar");
        write_file(&mod_a.join("images/title.img"), b"A-title");
        let mod_b = root.join("mods/mod-b/modfiles");
        write_file(&mod_b.join("mbe/data/foo.mbe/Sheet1.csv"), b"B-1");
        write_file(&mod_b.join("images/title.img"), b"B-title");

        let paths = InstallPaths {
            game_resources_dir: root.join("game"),
            output_dir: root.join("output"),
            resources_dir: root.join("resources"),
            backups_dir: root.join("backups"),
        };
        let mods = vec![
            ActiveMod::from_dir(root.join("mods/mod-a")),
            ActiveMod::from_dir(root.join("mods/mod-b")),
        ];

        Fixture {
            _dir: dir,
            root,
            paths,
            original,
            mods,
        }
    }

    fn file_list() -> FileList {
        FileList::parse("data/foo.mbe,DSDBP\nscript64/bar.nut,DSDBP\n").unwrap()
    }

    fn installer(
        f: &Fixture,
        codec: Arc<FakeCodec>,
        toolchain: Arc<FakeToolchain>,
    ) -> (ModInstaller, Arc<Mutex<Vec<InstallEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut installer = ModInstaller::new(f.paths.clone(), codec, toolchain)
            .with_workers(2)
            .with_file_list(file_list())
            .with_progress(move |event| sink.lock().unwrap().push(event));
        installer.set_active_mods(f.mods.clone());
        (installer, events)
    }

    fn live_archive(f: &Fixture) -> Utf8PathBuf {
        f.paths.game_resources_dir.join("DSDBP.steam.mvgl")
    }

    #[test]
    fn test_end_to_end_two_mods() {
        let f = fixture();
        let codec = Arc::new(FakeCodec::new());
        let (installer, events) = installer(&f, codec, Arc::new(FakeToolchain::new()));

        let result = installer.install().unwrap();

        assert_eq!(result.enabled_mods, vec!["mod-a", "mod-b"]);
        assert_eq!(result.bootstrap.fetched(), 2);
        assert!(result.archive.backup_created);

        let files = decode_archive(&fs::read(live_archive(&f)).unwrap());
        assert_eq!(files["images/title.img"], b"B-title");
        assert_eq!(files["script64/bar.nut"], [NUT_MAGIC, b"A-bar".as_slice()].concat());
        let table: BTreeMap<String, Vec<u8>> = serde_json::from_slice(&files["data/foo.mbe"]).unwrap();
        assert_eq!(table["Sheet1.csv"], b"B-1");
        assert_eq!(table["Sheet2.csv"], b"base-2");

        let backup = fs::read(f.paths.backups_dir.join("DSDBP.steam.mvgl")).unwrap();
        assert_eq!(backup, f.original);

        let record = InstallRecord::load(&f.paths.record_path()).unwrap().unwrap();
        assert_eq!(record.enabled_mods, vec!["mod-a", "mod-b"]);
        assert_eq!(installed_archive_is_current(&f.paths, ArchiveKind::Dsdbp).unwrap(), Some(true));

        let events = events.lock().unwrap();
        assert_eq!(events.first(), Some(&InstallEvent::LockControls));
        assert_eq!(events.last(), Some(&InstallEvent::ReleaseControls));
        assert!(events.contains(&InstallEvent::Log("Mods successfully installed.".to_string())));
    }

    #[test]
    fn test_loose_archive_files_beat_lower_sources() {
        let f = fixture();
        let mod_c = f.root.join("mods/mod-c/modfiles");
        write_file(&mod_c.join("script64/bar.nut"), b"C-compiled");
        write_file(&mod_c.join("data/foo.mbe"), b"C-packed");
        let toolchain = Arc::new(FakeToolchain::new());
        let (installer, _) = installer(&f, Arc::new(FakeCodec::new()), toolchain.clone());
        let mut installer = installer.with_conflict_policy(ConflictPolicy::ReportConflict);
        installer.set_active_mods(vec![
            f.mods[0].clone(),
            ActiveMod::from_dir(f.root.join("mods/mod-c")),
        ]);

        let result = installer.install().unwrap();

        let files = decode_archive(&fs::read(live_archive(&f)).unwrap());
        assert_eq!(files["script64/bar.nut"], b"C-compiled");
        assert_eq!(files["data/foo.mbe"], b"C-packed");
        assert_eq!(files["images/title.img"], b"A-title");
        assert_eq!(toolchain.count("compile"), 0);

        let conflicts: Vec<(&str, &str)> = result
            .merge
            .conflicts
            .iter()
            .map(|c| (c.path.as_str(), c.winner.as_str()))
            .collect();
        assert_eq!(
            conflicts,
            vec![("data/foo.mbe", "mod-c"), ("script64/bar.nut", "mod-c")]
        );
    }

    #[test]
    fn test_second_run_uses_warm_cache() {
        let f = fixture();
        let codec = Arc::new(FakeCodec::new());
        let toolchain = Arc::new(FakeToolchain::new());
        let (installer, _) = installer(&f, codec.clone(), toolchain.clone());

        installer.install().unwrap();
        let extracted = codec.count("extract_entry");
        let result = installer.install().unwrap();

        assert_eq!(result.bootstrap.fetched(), 0);
        assert_eq!(codec.count("extract_entry"), extracted);
        assert_eq!(codec.count("unpack"), 1);
        assert!(!result.archive.backup_created);
        let backup = fs::read(f.paths.backups_dir.join("DSDBP.steam.mvgl")).unwrap();
        assert_eq!(backup, f.original);
    }

    #[test]
    fn test_no_active_mods() {
        let f = fixture();
        let (mut installer, events) =
            installer(&f, Arc::new(FakeCodec::new()), Arc::new(FakeToolchain::new()));
        installer.set_active_mods(Vec::new());

        let err = installer.install().unwrap_err();

        assert!(matches!(err, Error::NoActiveMods));
        assert!(!f.paths.output_dir.join("patch").as_std_path().exists());
        assert_eq!(fs::read(live_archive(&f)).unwrap(), f.original);

        let events = events.lock().unwrap();
        assert_eq!(events.last(), Some(&InstallEvent::ReleaseControls));
        assert!(events.iter().any(|e| matches!(
            e,
            InstallEvent::Log(m) if m.starts_with("The following error occurred")
        )));
    }

    #[test]
    fn test_pack_failure_leaves_game_untouched() {
        let f = fixture();
        let (installer, events) = installer(
            &f,
            Arc::new(FakeCodec::new()),
            Arc::new(FakeToolchain::failing_on("bar.txt")),
        );

        let err = installer.install().unwrap_err();

        assert!(matches!(err, Error::PackJob { stage: crate::pack::StageKind::Script, .. }));
        assert_eq!(fs::read(live_archive(&f)).unwrap(), f.original);
        assert!(!f.paths.backups_dir.join("DSDBP.steam.mvgl").as_std_path().exists());
        assert!(!f.paths.record_path().as_std_path().exists());
        assert_eq!(events.lock().unwrap().last(), Some(&InstallEvent::ReleaseControls));
    }

    #[test]
    fn test_malformed_mod_aborts_before_bootstrap() {
        let f = fixture();
        let codec = Arc::new(FakeCodec::new());
        let (mut installer, _) = installer(&f, codec.clone(), Arc::new(FakeToolchain::new()));
        let mut mods = f.mods.clone();
        mods.push(ActiveMod::new("broken", f.root.join("mods/missing")));
        installer.set_active_mods(mods);

        let err = installer.install().unwrap_err();

        assert!(matches!(err, Error::MalformedMod { ref mod_id, .. } if mod_id == "broken"));
        assert!(codec.calls().is_empty());
    }

    #[test]
    fn test_bootstrap_only() {
        let f = fixture();
        let codec = Arc::new(FakeCodec::new());
        let (installer, _) = installer(&f, codec.clone(), Arc::new(FakeToolchain::new()));

        let report = installer.bootstrap_only().unwrap();

        assert_eq!(report.fetched(), 2);
        assert_eq!(codec.count("pack"), 0);
        assert_eq!(fs::read(live_archive(&f)).unwrap(), f.original);
    }

    #[test]
    fn test_status_detects_replaced_archive() {
        let f = fixture();
        let (installer, _) =
            installer(&f, Arc::new(FakeCodec::new()), Arc::new(FakeToolchain::new()));
        assert_eq!(installed_archive_is_current(&f.paths, ArchiveKind::Dsdbp).unwrap(), None);

        installer.install().unwrap();
        fs::write(live_archive(&f), b"game update").unwrap();

        assert_eq!(
            installed_archive_is_current(&f.paths, ArchiveKind::Dsdbp).unwrap(),
            Some(false)
        );
    }
}
