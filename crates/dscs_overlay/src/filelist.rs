//! The archive family and the static file list.
//!
//! The game ships its resources in a fixed family of `.mvgl` archives. The
//! [`FileList`] is a static table, shipped alongside the tool, recording which
//! archive owns every virtual resource path. The bootstrapper uses it to know
//! where a base asset must be extracted from.
//!
//! # File format
//!
//! ```text
//! # comment
//! data/chara.mbe,DSDB
//! script64/t1001.nut,DSDBS
//! ```
//!
//! Paths are matched case-insensitively and either separator is accepted.

use crate::error::{Error, Result};
use crate::utils::VirtualPath;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One member of the game's archive family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArchiveKind {
    Dsdb,
    Dsdba,
    Dsdbs,
    Dsdbsp,
    Dsdbp,
}

impl ArchiveKind {
    pub const ALL: [ArchiveKind; 5] = [
        ArchiveKind::Dsdb,
        ArchiveKind::Dsdba,
        ArchiveKind::Dsdbs,
        ArchiveKind::Dsdbsp,
        ArchiveKind::Dsdbp,
    ];

    /// The archive token, e.g. `DSDBP`.
    pub fn name(&self) -> &'static str {
        match self {
            ArchiveKind::Dsdb => "DSDB",
            ArchiveKind::Dsdba => "DSDBA",
            ArchiveKind::Dsdbs => "DSDBS",
            ArchiveKind::Dsdbsp => "DSDBSP",
            ArchiveKind::Dsdbp => "DSDBP",
        }
    }

    /// File name of the encrypted archive as the game ships it.
    pub fn packed_file_name(&self) -> String {
        format!("{}.steam.mvgl", self.name())
    }

    /// File name of the packed but not yet encrypted archive.
    pub fn decrypted_file_name(&self) -> String {
        format!("{}.decrypt.mvgl", self.name())
    }

    /// Directory name of the unpacked archive.
    pub fn unpacked_dir_name(&self) -> &'static str {
        self.name()
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ArchiveKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        ArchiveKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(token))
            .ok_or_else(|| Error::UnknownArchive(token.to_string()))
    }
}

/// Static mapping of virtual resource path -> owning archive.
#[derive(Debug, Default, Clone)]
pub struct FileList {
    /// Lowercased virtual path -> archive.
    entries: HashMap<String, ArchiveKind>,
}

impl FileList {
    /// Parse the textual file list format.
    ///
    /// Later lines win if a path is listed twice.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = HashMap::new();

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim_start_matches('\u{feff}').trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (path, archive) = line.rsplit_once(',').ok_or_else(|| Error::FileListParse {
                line: line_no,
                reason: "expected '<path>,<archive>'".to_string(),
            })?;

            let path = VirtualPath::new(path.trim()).map_err(|e| Error::FileListParse {
                line: line_no,
                reason: e.to_string(),
            })?;
            let archive: ArchiveKind = archive.parse().map_err(|e: Error| Error::FileListParse {
                line: line_no,
                reason: e.to_string(),
            })?;

            if let Some(previous) = entries.insert(path.lookup_key(), archive) {
                tracing::debug!(
                    "File list line {} moves '{}' from {} to {}",
                    line_no,
                    path,
                    previous,
                    archive
                );
            }
        }

        tracing::debug!("Parsed file list with {} entries", entries.len());
        Ok(Self { entries })
    }

    /// Load and parse a file list from disk.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_std_path())?;
        Self::parse(&text)
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (VirtualPath, ArchiveKind)>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(path, kind)| (path.lookup_key(), kind))
                .collect(),
        }
    }

    /// The archive owning `path`, if the base game ships it at all.
    pub fn archive_for(&self, path: &VirtualPath) -> Option<ArchiveKind> {
        self.entries.get(&path.lookup_key()).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
