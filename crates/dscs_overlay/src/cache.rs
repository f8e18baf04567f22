//! The on-disk cache of base-game resources.
//!
//! [`ResourceCache`] is an explicit handle to a directory that persists across
//! runs and only ever grows. The bootstrapper fills it; the merger reads base
//! tables and the archive installer reads base archives from it. Base scripts
//! are a reference copy only.
//!
//! ```text
//! resources/
//!   base_mbes/data/chara.mbe/...     # unpacked base tables
//!   base_scripts/script64/t1001.txt  # decompiled base scripts
//!   DSDBP/...                        # unpacked base archives
//!   .scratch/                        # temporary extraction area
//! ```

use crate::filelist::ArchiveKind;
use crate::index::Category;
use crate::utils::VirtualPath;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;

pub const BASE_TABLES_DIR: &str = "base_mbes";
pub const BASE_SCRIPTS_DIR: &str = "base_scripts";
pub const SCRATCH_DIR: &str = ".scratch";

/// A base-game asset that may have to be extracted into the cache.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Resource {
    /// A packed table, e.g. `data/chara.mbe`.
    Table(VirtualPath),
    /// A compiled script, e.g. `script64/t1001.nut`.
    Script(VirtualPath),
}

impl Resource {
    /// Path of the resource inside its archive.
    pub fn archive_path(&self) -> &VirtualPath {
        match self {
            Resource::Table(path) | Resource::Script(path) => path,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Resource::Table(_) => Category::Table,
            Resource::Script(_) => Category::ScriptSrc,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Table(path) => write!(f, "table {}", path),
            Resource::Script(path) => write!(f, "script {}", path),
        }
    }
}

/// Handle to the base-resource cache directory.
#[derive(Debug, Clone)]
pub struct ResourceCache {
    root: Utf8PathBuf,
}

impl ResourceCache {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory holding the unpacked sheets of a base table.
    pub fn table_dir(&self, table: &VirtualPath) -> Utf8PathBuf {
        table.to_fs_path(&self.root.join(BASE_TABLES_DIR))
    }

    /// Decompiled source of a base script, given its compiled archive path.
    pub fn script_source(&self, script: &VirtualPath) -> Utf8PathBuf {
        script
            .with_extension("txt")
            .to_fs_path(&self.root.join(BASE_SCRIPTS_DIR))
    }

    /// Directory holding an unpacked base archive.
    pub fn archive_dir(&self, kind: ArchiveKind) -> Utf8PathBuf {
        self.root.join(kind.unpacked_dir_name())
    }

    pub fn scratch_dir(&self) -> Utf8PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    /// Where a resource lives once it has been bootstrapped.
    pub fn location(&self, resource: &Resource) -> Utf8PathBuf {
        match resource {
            Resource::Table(path) => self.table_dir(path),
            Resource::Script(path) => self.script_source(path),
        }
    }

    pub fn has(&self, resource: &Resource) -> bool {
        let location = self.location(resource);
        match resource {
            Resource::Table(_) => location.as_std_path().is_dir(),
            Resource::Script(_) => location.as_std_path().is_file(),
        }
    }

    pub fn has_archive(&self, kind: ArchiveKind) -> bool {
        self.archive_dir(kind).as_std_path().is_dir()
    }
}
