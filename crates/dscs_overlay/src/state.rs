//! Record of the last successful install.
//!
//! After an install, an [`InstallRecord`] is written to `install.json` in the
//! output directory. Front ends compare it with the live archive to tell
//! whether the installed patch is still in place or a game update has
//! replaced the archive since.

use crate::error::Result;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};

/// File name of the record inside the output directory.
pub const INSTALL_RECORD_FILE: &str = "install.json";

const CURRENT_VERSION: u32 = 1;

/// Snapshot of what was installed, persisted as `install.json`.
///
/// # JSON format
///
/// ```json
/// {
///   "version": 1,
///   "target": "DSDBP",
///   "enabledMods": ["mod-a", "mod-b"],
///   "archiveHash": 1234567890
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRecord {
    pub version: u32,

    /// Archive that was replaced.
    pub target: String,

    /// Mod ids in activation order.
    pub enabled_mods: Vec<String>,

    /// xxHash3 of the installed archive.
    pub archive_hash: u64,
}

impl InstallRecord {
    pub fn new(target: impl Into<String>, enabled_mods: Vec<String>, archive_hash: u64) -> Self {
        Self {
            version: CURRENT_VERSION,
            target: target.into(),
            enabled_mods,
            archive_hash,
        }
    }

    /// Load a record, returning `Ok(None)` if the file doesn't exist.
    pub fn load(path: &Utf8Path) -> Result<Option<Self>> {
        if !path.as_std_path().exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(path.as_std_path())?;
        let record: Self = serde_json::from_str(&contents)?;
        Ok(Some(record))
    }

    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_std_path(), contents)?;
        Ok(())
    }

    /// Whether the live archive is still the one this record describes.
    pub fn matches(&self, archive_hash: u64) -> bool {
        self.version == CURRENT_VERSION && self.archive_hash == archive_hash
    }
}
