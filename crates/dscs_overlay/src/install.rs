//! Rebuilding, encrypting and installing the patched archive.
//!
//! The packed patch tree is laid over an unpacked copy of the base archive,
//! repacked, encrypted and copied over the live archive. The live archive is
//! backed up once, the first time it is replaced; that backup is never
//! overwritten afterwards and doubles as the pristine origin for bootstrapping.

use crate::bootstrap::{ArchiveOrigins, Bootstrapper};
use crate::codec::ArchiveCodec;
use crate::error::{Error, Result};
use crate::filelist::ArchiveKind;
use crate::merge::PatchTree;
use crate::progress::EventSink;
use crate::utils::{copy_dir_all, hash_file, remove_if_exists};
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::sync::Arc;

/// Step of the archive build, used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    PreparingWorkingTree,
    Packing,
    Encrypting,
    BackingUp,
    Installing,
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            InstallStep::PreparingWorkingTree => "preparing the working tree",
            InstallStep::Packing => "packing",
            InstallStep::Encrypting => "encrypting",
            InstallStep::BackingUp => "backing up the original archive",
            InstallStep::Installing => "installing",
        };
        f.write_str(step)
    }
}

#[derive(Debug, Clone)]
pub struct InstalledArchive {
    pub kind: ArchiveKind,
    pub live_path: Utf8PathBuf,
    pub backup_path: Utf8PathBuf,
    /// Whether this run created the backup.
    pub backup_created: bool,
    /// xxh3 of the installed archive.
    pub archive_hash: u64,
    pub files_overlaid: usize,
}

/// Remove everything a previous run left in the output directory.
pub fn clean_previous_outputs(output_dir: &Utf8Path, tree: &PatchTree, kind: ArchiveKind) -> Result<()> {
    tree.clear()?;
    remove_if_exists(&output_dir.join(kind.unpacked_dir_name()))?;
    remove_if_exists(&output_dir.join(kind.packed_file_name()))?;
    remove_if_exists(&output_dir.join(kind.decrypted_file_name()))?;
    Ok(())
}

pub struct ArchiveInstaller {
    codec: Arc<dyn ArchiveCodec>,
    bootstrapper: Bootstrapper,
    output_dir: Utf8PathBuf,
    kind: ArchiveKind,
    events: EventSink,
}

impl ArchiveInstaller {
    pub fn new(
        codec: Arc<dyn ArchiveCodec>,
        bootstrapper: Bootstrapper,
        output_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            codec,
            bootstrapper,
            output_dir: output_dir.into(),
            kind: ArchiveKind::Dsdbp,
            events: EventSink::silent(),
        }
    }

    pub fn with_target(mut self, kind: ArchiveKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    fn origins(&self) -> &ArchiveOrigins {
        self.bootstrapper.origins()
    }

    /// Build the archive from the base copy plus `tree`'s overlay and install it.
    pub fn install(&self, tree: &PatchTree) -> Result<InstalledArchive> {
        let kind = self.kind;
        let base = self.bootstrapper.ensure_archive(kind)?;

        self.events.log("Generating patched MVGL archive...");
        let files_overlaid = self
            .prepare_working_tree(&base, tree)
            .map_err(|e| Error::archive_build(InstallStep::PreparingWorkingTree, e))?;

        self.codec
            .pack(kind, &self.output_dir, &self.output_dir, false)
            .map_err(|e| Error::archive_build(InstallStep::Packing, e))?;

        let built = self
            .encrypt()
            .map_err(|e| Error::archive_build(InstallStep::Encrypting, e))?;

        let live_path = self.origins().live_archive(kind);
        let backup_path = self.origins().backup_archive(kind);
        let backup_created = if backup_path.as_std_path().is_file() {
            false
        } else {
            self.events.log("Creating backup...");
            replace_file(&live_path, &backup_path)
                .map_err(|e| Error::archive_build(InstallStep::BackingUp, e))?;
            true
        };

        self.events.log("Installing patched archive...");
        replace_file(&built, &live_path)
            .map_err(|e| Error::archive_build(InstallStep::Installing, e))?;
        let archive_hash =
            hash_file(&live_path).map_err(|e| Error::archive_build(InstallStep::Installing, e))?;

        tracing::info!(
            "Installed {} ({} overlay files, hash {:016x}, backup {})",
            live_path,
            files_overlaid,
            archive_hash,
            if backup_created { "created" } else { "kept" }
        );

        Ok(InstalledArchive {
            kind,
            live_path,
            backup_path,
            backup_created,
            archive_hash,
            files_overlaid,
        })
    }

    /// Recreate `<output>/<ARCHIVE>/` from the base archive with the patch on top.
    fn prepare_working_tree(&self, base: &Utf8Path, tree: &PatchTree) -> Result<usize> {
        let working = self.output_dir.join(self.kind.unpacked_dir_name());
        remove_if_exists(&working)?;

        let base_files = copy_dir_all(base, &working)?;
        let overlaid = if tree.exists() {
            copy_dir_all(&tree.patch_dir(), &working)?
        } else {
            0
        };
        tracing::debug!("Working tree {}: {} base files, {} overlaid", working, base_files, overlaid);
        Ok(overlaid)
    }

    fn encrypt(&self) -> Result<Utf8PathBuf> {
        let kind = self.kind;
        self.codec
            .encrypt(kind, &self.output_dir, &self.output_dir, true)?;

        let built = self.output_dir.join(kind.packed_file_name());
        if !built.as_std_path().is_file() {
            return Err(Error::Other(format!("encrypted archive {} was not written", built)));
        }
        remove_if_exists(&self.output_dir.join(kind.decrypted_file_name()))?;
        Ok(built)
    }
}

/// Copy `src` over `dst` through a sibling temporary file, so `dst` is either
/// the old file or the complete new one.
fn replace_file(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    let parent = dst
        .parent()
        .ok_or_else(|| Error::InvalidPath(dst.to_string()))?;
    std::fs::create_dir_all(parent.as_std_path())?;

    let file_name = dst
        .file_name()
        .ok_or_else(|| Error::InvalidPath(dst.to_string()))?;
    let partial = parent.join(format!("{}.partial", file_name));
    std::fs::copy(src.as_std_path(), partial.as_std_path())?;
    if let Err(e) = std::fs::rename(partial.as_std_path(), dst.as_std_path()) {
        let _ = std::fs::remove_file(partial.as_std_path());
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResourceCache;
    use crate::filelist::FileList;
    use crate::test_utils::{
        decode_archive, utf8_tempdir, write_archive, write_file, FakeCodec, FakeToolchain,
    };
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
        tree: PatchTree,
        original: Vec<u8>,
    }

    fn fixture() -> Fixture {
        let (dir, root) = utf8_tempdir();
        let live = write_archive(
            &root.join("game"),
            ArchiveKind::Dsdbp,
            &[("images/title.img", b"base-title"), ("data/keep.bin", b"keep")],
        );
        let original = fs::read(live).unwrap();

        let tree = PatchTree::new(root.join("output"));
        tree.reset().unwrap();
        write_file(&tree.patch_dir().join("images/title.img"), b"mod-title");
        write_file(&tree.patch_dir().join("images/new.img"), b"new");

        Fixture {
            _dir: dir,
            root,
            tree,
            original,
        }
    }

    fn installer(root: &Utf8Path, codec: Arc<FakeCodec>) -> ArchiveInstaller {
        let bootstrapper = Bootstrapper::new(
            codec.clone(),
            Arc::new(FakeToolchain::new()),
            ResourceCache::new(root.join("resources")),
            Arc::new(FileList::default()),
            ArchiveOrigins::new(root.join("game"), root.join("backups")),
        );
        ArchiveInstaller::new(codec, bootstrapper, root.join("output"))
    }

    #[test]
    fn test_install_overlays_backs_up_and_replaces() {
        let f = fixture();
        let installed = installer(&f.root, Arc::new(FakeCodec::new()))
            .install(&f.tree)
            .unwrap();

        assert!(installed.backup_created);
        assert_eq!(installed.files_overlaid, 2);
        assert_eq!(fs::read(&installed.backup_path).unwrap(), f.original);

        let files = decode_archive(&fs::read(&installed.live_path).unwrap());
        assert_eq!(files["images/title.img"], b"mod-title");
        assert_eq!(files["images/new.img"], b"new");
        assert_eq!(files["data/keep.bin"], b"keep");
        assert_eq!(installed.archive_hash, hash_file(&installed.live_path).unwrap());

        let output = f.root.join("output");
        assert!(!output.join("DSDBP.decrypt.mvgl").as_std_path().exists());
        assert!(!f.root.join("backups/DSDBP.steam.mvgl.partial").as_std_path().exists());
    }

    #[test]
    fn test_backup_is_never_overwritten() {
        let f = fixture();
        let codec = Arc::new(FakeCodec::new());
        installer(&f.root, codec.clone()).install(&f.tree).unwrap();

        write_file(&f.tree.patch_dir().join("images/title.img"), b"second");
        let second = installer(&f.root, codec).install(&f.tree).unwrap();

        assert!(!second.backup_created);
        assert_eq!(fs::read(&second.backup_path).unwrap(), f.original);
        let files = decode_archive(&fs::read(&second.live_path).unwrap());
        assert_eq!(files["images/title.img"], b"second");
    }

    #[test]
    fn test_pack_failure_leaves_live_archive_alone() {
        let f = fixture();
        let codec = Arc::new(FakeCodec::failing_on("output"));

        let err = installer(&f.root, codec).install(&f.tree).unwrap_err();

        assert!(matches!(err, Error::ArchiveBuild { step: InstallStep::Packing, .. }));
        let live = f.root.join("game").join(ArchiveKind::Dsdbp.packed_file_name());
        assert_eq!(fs::read(live).unwrap(), f.original);
        assert!(!f.root.join("backups").as_std_path().exists());
    }

    #[test]
    fn test_clean_previous_outputs() {
        let f = fixture();
        let output = f.root.join("output");
        write_file(&output.join("DSDBP/a.bin"), b"a");
        write_file(&output.join("DSDBP.steam.mvgl"), b"x");
        write_file(&output.join("DSDBP.decrypt.mvgl"), b"x");
        write_file(&output.join("install.json"), b"{}");

        clean_previous_outputs(&output, &f.tree, ArchiveKind::Dsdbp).unwrap();

        assert!(!f.tree.exists());
        assert!(!output.join("DSDBP").as_std_path().exists());
        assert!(!output.join("DSDBP.steam.mvgl").as_std_path().exists());
        assert!(!output.join("DSDBP.decrypt.mvgl").as_std_path().exists());
        assert!(output.join("install.json").as_std_path().is_file());
    }

    #[test]
    fn test_step_display() {
        let err = Error::archive_build(InstallStep::BackingUp, Error::Other("disk full".into()));
        assert_eq!(
            err.to_string(),
            "Archive build failed while backing up the original archive: disk full"
        );
    }
}
