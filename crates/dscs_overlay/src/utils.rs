//! Virtual path normalization and filesystem helpers.
//!
//! Mods store files with whatever separator convention their author's
//! platform used. Everything inside the pipeline is keyed by [`VirtualPath`],
//! the `/`-separated location an asset occupies inside the archive namespace.

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;
use walkdir::WalkDir;
use xxhash_rust::xxh3::Xxh3;

/// A normalized path inside the game's archive namespace.
///
/// Always relative, `/`-separated, and free of `.`/`..` components. Case is
/// preserved; use [`lookup_key`](Self::lookup_key) for case-insensitive matching
/// against the static file list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VirtualPath(String);

impl VirtualPath {
    /// Normalize a raw path string (either separator) into a virtual path.
    pub fn new(raw: &str) -> Result<Self> {
        let mut parts = Vec::new();
        for part in raw.split(['/', '\\']) {
            match part {
                "" | "." => continue,
                ".." => return Err(Error::InvalidPath(raw.to_string())),
                other => parts.push(other),
            }
        }

        if parts.is_empty() {
            return Err(Error::InvalidPath(raw.to_string()));
        }

        Ok(Self(parts.join("/")))
    }

    /// Build a virtual path from a path relative to some content root.
    pub fn from_relative(rel: &Utf8Path) -> Result<Self> {
        Self::new(rel.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// The containing directory, or `None` for a top-level entry.
    pub fn parent(&self) -> Option<VirtualPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| Self(parent.to_string()))
    }

    /// Append further components.
    pub fn join(&self, tail: &str) -> Result<VirtualPath> {
        Self::new(&format!("{}/{}", self.0, tail))
    }

    /// Replace (or add) the extension of the final component.
    pub fn with_extension(&self, extension: &str) -> VirtualPath {
        let name = self.file_name();
        let stem = match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        };
        let renamed = format!("{}.{}", stem, extension);
        match self.parent() {
            Some(parent) => Self(format!("{}/{}", parent.0, renamed)),
            None => Self(renamed),
        }
    }

    /// Key used for case-insensitive lookups.
    pub fn lookup_key(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Location of this virtual path under a filesystem root.
    pub fn to_fs_path(&self, root: &Utf8Path) -> Utf8PathBuf {
        let mut path = root.to_path_buf();
        for component in self.components() {
            path.push(component);
        }
        path
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VirtualPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<VirtualPath> for String {
    fn from(value: VirtualPath) -> Self {
        value.0
    }
}

/// Convert a walked `std` path into a UTF-8 path, warning on failure.
pub(crate) fn utf8_path(path: &std::path::Path) -> Option<Utf8PathBuf> {
    match Utf8PathBuf::from_path_buf(path.to_path_buf()) {
        Ok(p) => Some(p),
        Err(p) => {
            tracing::warn!("Skipping non-UTF-8 path: {}", p.display());
            None
        }
    }
}

/// Copy a single file, creating the destination's parent directories.
pub fn copy_file(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent.as_std_path())?;
    }
    std::fs::copy(src.as_std_path(), dst.as_std_path())?;
    Ok(())
}

/// Recursively copy `src` onto `dst`, overwriting files that already exist.
///
/// Existing files in `dst` that are not present in `src` are left alone, which
/// makes this a plain directory overlay. Returns the number of files copied.
pub fn copy_dir_all(src: &Utf8Path, dst: &Utf8Path) -> Result<usize> {
    std::fs::create_dir_all(dst.as_std_path())?;

    let mut copied = 0;
    for entry in WalkDir::new(src.as_std_path()).sort_by_file_name() {
        let entry = entry?;
        let Some(path) = utf8_path(entry.path()) else {
            continue;
        };
        let rel = path
            .strip_prefix(src)
            .map_err(|_| format!("Walked path is not under {}: {}", src, path))?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(target.as_std_path())?;
        } else {
            std::fs::copy(path.as_std_path(), target.as_std_path())?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Remove a file or directory if it exists.
pub fn remove_if_exists(path: &Utf8Path) -> Result<()> {
    let std_path = path.as_std_path();
    if std_path.is_dir() {
        std::fs::remove_dir_all(std_path)?;
    } else if std_path.exists() {
        std::fs::remove_file(std_path)?;
    }
    Ok(())
}

/// Streaming xxHash3 of a file's contents.
pub fn hash_file(path: &Utf8Path) -> Result<u64> {
    use std::io::Read;

    let mut file = std::fs::File::open(path.as_std_path())?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.digest())
}
