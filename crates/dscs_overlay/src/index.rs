//! Mod content indexing.
//!
//! A [`ModIndex`] records, per [`Category`], which file inside a mod replaces
//! which virtual resource path. Mods use this on-disk layout:
//!
//! ```text
//! mod_dir/
//!   METADATA.json                  # Optional, not read here
//!   modfiles/                      # Content root (required)
//!     script_src/
//!       t1001.txt                  # -> script64/t1001.txt   (script_src)
//!     mbe/
//!       data/
//!         chara.mbe/
//!           000_Chara.csv          # -> data/chara.mbe/000_Chara.csv (table)
//!     images/
//!       title.img                  # -> images/title.img     (loose)
//! ```
//!
//! Table sources live under `mbe/<kind>/` where `<kind>` is one of `data`,
//! `message` or `text`, and every sheet must sit directly inside a `<name>.mbe`
//! directory. Anything that breaks that shape is a [`MalformedMod`](Error::MalformedMod).

use crate::error::{Error, Result};
use crate::utils::{utf8_path, VirtualPath};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use walkdir::WalkDir;

/// Name of the content root inside a mod directory.
pub const CONTENT_ROOT: &str = "modfiles";
/// Subdirectory of the content root holding plaintext script sources.
pub const SCRIPT_SRC_DIR: &str = "script_src";
/// Subdirectory of the content root holding table sources.
pub const TABLE_SRC_DIR: &str = "mbe";
/// Archive directory that compiled scripts live in.
pub const SCRIPT_ARCHIVE_DIR: &str = "script64";

/// Asset category of an indexed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Plaintext script source, compiled during packing.
    ScriptSrc,
    /// One sheet of an editable MBE table, packed during packing.
    Table,
    /// Any other file, copied into the archive as-is.
    Loose,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::ScriptSrc, Category::Table, Category::Loose];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ScriptSrc => "script_src",
            Category::Table => "table",
            Category::Loose => "loose",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Table families, each packed by its own pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Data,
    Message,
    Text,
}

impl TableKind {
    pub const ALL: [TableKind; 3] = [TableKind::Data, TableKind::Message, TableKind::Text];

    /// Directory name, both under `mbe/` in a mod and in the archive.
    pub fn dir_name(&self) -> &'static str {
        match self {
            TableKind::Data => "data",
            TableKind::Message => "message",
            TableKind::Text => "text",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        TableKind::ALL
            .into_iter()
            .find(|kind| kind.dir_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Which files one activated mod replaces.
///
/// Built once by [`ModIndex::build`] and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ModIndex {
    mod_id: String,
    content_root: Utf8PathBuf,
    entries: BTreeMap<Category, BTreeMap<VirtualPath, Utf8PathBuf>>,
}

impl ModIndex {
    /// Index the mod stored in `mod_dir`.
    ///
    /// Fails with [`Error::MalformedMod`] if `mod_dir/modfiles` does not exist or a
    /// file under it cannot be classified.
    pub fn build(mod_id: impl Into<String>, mod_dir: &Utf8Path) -> Result<Self> {
        let mod_id = mod_id.into();
        let content_root = mod_dir.join(CONTENT_ROOT);

        if !content_root.as_std_path().is_dir() {
            return Err(Error::malformed_mod(
                mod_id,
                format!("missing '{}' directory in {}", CONTENT_ROOT, mod_dir),
            ));
        }

        let mut entries: BTreeMap<Category, BTreeMap<VirtualPath, Utf8PathBuf>> = BTreeMap::new();

        for entry in WalkDir::new(content_root.as_std_path()).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(path) = utf8_path(entry.path()) else {
                continue;
            };

            let rel = path
                .strip_prefix(&content_root)
                .map_err(|_| format!("Walked path is not under {}: {}", content_root, path))?;
            let (category, virtual_path) = classify(&mod_id, rel)?;

            tracing::trace!("Mod={} {} {} <- {}", mod_id, category, virtual_path, rel);
            entries
                .entry(category)
                .or_default()
                .insert(virtual_path, path);
        }

        let index = Self {
            mod_id,
            content_root,
            entries,
        };

        tracing::info!(
            "Indexed mod={} script_src={} table={} loose={}",
            index.mod_id,
            index.entries(Category::ScriptSrc).count(),
            index.entries(Category::Table).count(),
            index.entries(Category::Loose).count(),
        );

        Ok(index)
    }

    pub fn mod_id(&self) -> &str {
        &self.mod_id
    }

    pub fn content_root(&self) -> &Utf8Path {
        &self.content_root
    }

    /// Entries of one category, ordered by virtual path.
    pub fn entries(&self, category: Category) -> impl Iterator<Item = (&VirtualPath, &Utf8Path)> {
        self.entries
            .get(&category)
            .into_iter()
            .flat_map(|map| map.iter().map(|(v, s)| (v, s.as_path())))
    }

    /// All entries as `(category, virtual path, source file)`.
    pub fn iter(&self) -> impl Iterator<Item = (Category, &VirtualPath, &Utf8Path)> {
        self.entries.iter().flat_map(|(category, map)| {
            map.iter()
                .map(move |(v, s)| (*category, v, s.as_path()))
        })
    }

    /// Source file replacing `path`, if this mod touches it.
    pub fn source_for(&self, category: Category, path: &VirtualPath) -> Option<&Utf8Path> {
        self.entries
            .get(&category)
            .and_then(|map| map.get(path))
            .map(|s| s.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decide the category and virtual path of a file relative to the content root.
fn classify(mod_id: &str, rel: &Utf8Path) -> Result<(Category, VirtualPath)> {
    let parts: Vec<&str> = rel.components().map(|c| c.as_str()).collect();

    match parts.first().copied() {
        Some(first) if parts.len() > 1 && first.eq_ignore_ascii_case(SCRIPT_SRC_DIR) => {
            let tail = parts[1..].join("/");
            let path = VirtualPath::new(&format!("{}/{}", SCRIPT_ARCHIVE_DIR, tail))?;
            Ok((Category::ScriptSrc, path))
        }
        Some(first) if parts.len() > 1 && first.eq_ignore_ascii_case(TABLE_SRC_DIR) => {
            // mbe/<kind>/<dirs...>/<name>.mbe/<sheet>
            if parts.len() < 4 {
                return Err(Error::malformed_mod(
                    mod_id,
                    format!("table sheet '{}' is not inside a <kind>/<name>.mbe directory", rel),
                ));
            }
            let Some(kind) = TableKind::from_dir_name(parts[1]) else {
                return Err(Error::malformed_mod(
                    mod_id,
                    format!("unknown table kind '{}' in '{}'", parts[1], rel),
                ));
            };
            let table_dir = parts[parts.len() - 2];
            if !table_dir.to_ascii_lowercase().ends_with(".mbe") {
                return Err(Error::malformed_mod(
                    mod_id,
                    format!("table sheet '{}' must sit directly inside a .mbe directory", rel),
                ));
            }
            let tail = parts[2..].join("/");
            let path = VirtualPath::new(&format!("{}/{}", kind.dir_name(), tail))?;
            Ok((Category::Table, path))
        }
        _ => Ok((Category::Loose, VirtualPath::from_relative(rel)?)),
    }
}

/// The `.mbe` table directory a table sheet belongs to.
pub fn table_of(sheet: &VirtualPath) -> Option<VirtualPath> {
    sheet
        .parent()
        .filter(|dir| dir.file_name().to_ascii_lowercase().ends_with(".mbe"))
}

/// The table kind encoded in a table virtual path's first component.
pub fn table_kind_of(path: &VirtualPath) -> Option<TableKind> {
    path.components().next().and_then(TableKind::from_dir_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn create_test_mod_dir() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let content = dir.path().join(CONTENT_ROOT);

        fs::create_dir_all(content.join("script_src/battle")).unwrap();
        fs::write(content.join("script_src/t1001.txt"), b"function main() {}").unwrap();
        fs::write(content.join("script_src/battle/b01.txt"), b"// battle").unwrap();

        fs::create_dir_all(content.join("mbe/data/chara.mbe")).unwrap();
        fs::write(content.join("mbe/data/chara.mbe/000_Chara.csv"), b"id,name").unwrap();
        fs::create_dir_all(content.join("mbe/message/field/msg.mbe")).unwrap();
        fs::write(content.join("mbe/message/field/msg.mbe/Sheet1.csv"), b"id,text").unwrap();

        fs::create_dir_all(content.join("images")).unwrap();
        fs::write(content.join("images/title.img"), b"IMG").unwrap();

        dir
    }

    fn utf8(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_build_classifies_entries() {
        let dir = create_test_mod_dir();
        let index = ModIndex::build("test-mod", &utf8(&dir)).unwrap();

        assert_eq!(index.mod_id(), "test-mod");
        assert_eq!(index.len(), 5);

        let scripts: Vec<&str> = index
            .entries(Category::ScriptSrc)
            .map(|(v, _)| v.as_str())
            .collect();
        assert_eq!(scripts, vec!["script64/battle/b01.txt", "script64/t1001.txt"]);

        let tables: Vec<&str> = index
            .entries(Category::Table)
            .map(|(v, _)| v.as_str())
            .collect();
        assert_eq!(
            tables,
            vec!["data/chara.mbe/000_Chara.csv", "message/field/msg.mbe/Sheet1.csv"]
        );

        let loose: Vec<&str> = index
            .entries(Category::Loose)
            .map(|(v, _)| v.as_str())
            .collect();
        assert_eq!(loose, vec!["images/title.img"]);
    }

    #[test]
    fn test_source_for_points_into_mod() {
        let dir = create_test_mod_dir();
        let root = utf8(&dir);
        let index = ModIndex::build("test-mod", &root).unwrap();

        let path = VirtualPath::new("images/title.img").unwrap();
        let source = index.source_for(Category::Loose, &path).unwrap();
        assert_eq!(source, root.join("modfiles/images/title.img"));
        assert!(index.source_for(Category::Table, &path).is_none());
    }

    #[test]
    fn test_missing_content_root() {
        let dir = tempdir().unwrap();
        let err = ModIndex::build("empty", &utf8(&dir)).unwrap_err();
        assert!(matches!(err, Error::MalformedMod { ref mod_id, .. } if mod_id == "empty"));
    }

    #[test]
    fn test_empty_content_root_is_valid() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(CONTENT_ROOT)).unwrap();
        let index = ModIndex::build("empty", &utf8(&dir)).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_unknown_table_kind() {
        let dir = tempdir().unwrap();
        let table = dir.path().join("modfiles/mbe/sound/x.mbe");
        fs::create_dir_all(&table).unwrap();
        fs::write(table.join("a.csv"), b"").unwrap();

        let err = ModIndex::build("bad", &utf8(&dir)).unwrap_err();
        assert!(matches!(err, Error::MalformedMod { .. }));
    }

    #[test]
    fn test_sheet_outside_mbe_directory() {
        let dir = tempdir().unwrap();
        let table = dir.path().join("modfiles/mbe/data/loose");
        fs::create_dir_all(&table).unwrap();
        fs::write(table.join("a.csv"), b"").unwrap();

        let err = ModIndex::build("bad", &utf8(&dir)).unwrap_err();
        assert!(matches!(err, Error::MalformedMod { .. }));
    }

    #[test]
    fn test_table_helpers() {
        let sheet = VirtualPath::new("message/field/msg.mbe/Sheet1.csv").unwrap();
        assert_eq!(table_of(&sheet).unwrap().as_str(), "message/field/msg.mbe");
        assert_eq!(table_kind_of(&sheet), Some(TableKind::Message));

        let loose = VirtualPath::new("images/title.img").unwrap();
        assert!(table_of(&loose).is_none());
        assert_eq!(table_kind_of(&loose), None);
    }
}
