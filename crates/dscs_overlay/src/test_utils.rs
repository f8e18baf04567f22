//! In-process fakes for the external tools, shared by unit tests.
//!
//! `FakeCodec` stores an "archive" as a JSON map of entry path -> bytes, and
//! "encrypts" by XOR-ing every byte. Tables are JSON maps of sheet name ->
//! bytes. `FakeToolchain` "compiles" by prefixing a magic header.

use crate::codec::{swap_extension, ArchiveCodec, ScriptToolchain};
use crate::error::{Error, Result};
use crate::filelist::ArchiveKind;
use crate::index::{ModIndex, CONTENT_ROOT};
use crate::utils::{remove_if_exists, utf8_path, VirtualPath};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;
use walkdir::WalkDir;

const XOR_KEY: u8 = 0x5A;
pub const NUT_MAGIC: &[u8] = b"NUT\0";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dscs_overlay=debug")
        .with_test_writer()
        .try_init();
}

pub fn utf8_tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, root)
}

fn xor(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| b ^ XOR_KEY).collect()
}

/// Read every file under `dir` into a map keyed by `/`-separated relative path.
pub fn read_tree(dir: &Utf8Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(dir.as_std_path()).sort_by_file_name() {
        let entry = entry.unwrap();
        if !entry.file_type().is_file() {
            continue;
        }
        let path = utf8_path(entry.path()).unwrap();
        let rel = path.strip_prefix(dir).unwrap();
        files.insert(VirtualPath::from_relative(rel).unwrap().to_string(), fs::read(&path).unwrap());
    }
    files
}

fn write_tree(dir: &Utf8Path, files: &BTreeMap<String, Vec<u8>>) -> Result<()> {
    for (rel, bytes) in files {
        let path = VirtualPath::new(rel)?.to_fs_path(dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
    }
    Ok(())
}

/// Encode files the way `FakeCodec` stores a packed, encrypted archive.
pub fn encode_archive(files: &BTreeMap<String, Vec<u8>>) -> Vec<u8> {
    xor(&serde_json::to_vec(files).unwrap())
}

pub fn decode_archive(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    serde_json::from_slice(&xor(bytes)).unwrap()
}

/// Encode sheets the way `FakeCodec::pack_table` does.
pub fn encode_table(sheets: &BTreeMap<String, Vec<u8>>) -> Vec<u8> {
    serde_json::to_vec(sheets).unwrap()
}

/// Write `<dir>/<NAME>.steam.mvgl` containing `files`.
pub fn write_archive(dir: &Utf8Path, kind: ArchiveKind, files: &[(&str, &[u8])]) -> Utf8PathBuf {
    let map: BTreeMap<String, Vec<u8>> = files
        .iter()
        .map(|(path, bytes)| (path.to_string(), bytes.to_vec()))
        .collect();
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(kind.packed_file_name());
    fs::write(&path, encode_archive(&map)).unwrap();
    path
}

pub fn write_file(path: &Utf8Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

/// Create `<root>/<id>/modfiles/...` from `(relative path, contents)` pairs and index it.
pub fn write_mod(root: &Utf8Path, id: &str, files: &[(&str, &[u8])]) -> ModIndex {
    let mod_dir = root.join(id);
    fs::create_dir_all(mod_dir.join(CONTENT_ROOT)).unwrap();
    for (rel, bytes) in files {
        write_file(&mod_dir.join(CONTENT_ROOT).join(rel), bytes);
    }
    ModIndex::build(id, &mod_dir).unwrap()
}

#[derive(Default)]
pub struct FakeCodec {
    calls: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl FakeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make any operation whose input path contains `needle` fail.
    pub fn failing_on(needle: &str) -> Self {
        let codec = Self::default();
        *codec.fail_on.lock().unwrap() = Some(needle.to_string());
        codec
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    fn record(&self, op: &str, input: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{} {}", op, input));
        if let Some(needle) = self.fail_on.lock().unwrap().as_deref() {
            if input.contains(needle) {
                return Err(Error::Other(format!("{} failed on {}", op, input)));
            }
        }
        Ok(())
    }

    fn read_archive(origin_dir: &Utf8Path, kind: ArchiveKind) -> Result<BTreeMap<String, Vec<u8>>> {
        let bytes = fs::read(origin_dir.join(kind.packed_file_name()))?;
        Ok(serde_json::from_slice(&xor(&bytes))?)
    }
}

impl ArchiveCodec for FakeCodec {
    fn unpack(&self, kind: ArchiveKind, origin_dir: &Utf8Path, destination_dir: &Utf8Path) -> Result<()> {
        self.record("unpack", origin_dir.join(kind.packed_file_name()).as_str())?;
        let files = Self::read_archive(origin_dir, kind)?;
        write_tree(&destination_dir.join(kind.unpacked_dir_name()), &files)
    }

    fn pack(
        &self,
        kind: ArchiveKind,
        source_dir: &Utf8Path,
        destination_dir: &Utf8Path,
        remove_input: bool,
    ) -> Result<()> {
        let source = source_dir.join(kind.unpacked_dir_name());
        self.record("pack", source.as_str())?;
        let files = read_tree(&source);
        fs::write(
            destination_dir.join(kind.decrypted_file_name()),
            serde_json::to_vec(&files)?,
        )?;
        if remove_input {
            remove_if_exists(&source)?;
        }
        Ok(())
    }

    fn encrypt(
        &self,
        kind: ArchiveKind,
        source_dir: &Utf8Path,
        destination_dir: &Utf8Path,
        remove_input: bool,
    ) -> Result<()> {
        let source = source_dir.join(kind.decrypted_file_name());
        self.record("encrypt", source.as_str())?;
        let bytes = fs::read(&source)?;
        fs::write(destination_dir.join(kind.packed_file_name()), xor(&bytes))?;
        if remove_input {
            fs::remove_file(&source)?;
        }
        Ok(())
    }

    fn extract_entry(
        &self,
        kind: ArchiveKind,
        entry: &VirtualPath,
        origin_dir: &Utf8Path,
        destination_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf> {
        self.record("extract_entry", entry.as_str())?;
        let files = Self::read_archive(origin_dir, kind)?;
        let (_, bytes) = files
            .iter()
            .find(|(path, _)| path.eq_ignore_ascii_case(entry.as_str()))
            .ok_or_else(|| Error::Other(format!("{} has no entry {}", kind, entry)))?;
        let target = entry.to_fs_path(destination_dir);
        write_file(&target, bytes);
        Ok(target)
    }

    fn pack_table(&self, source_dir: &Utf8Path, destination_dir: &Utf8Path) -> Result<()> {
        self.record("pack_table", source_dir.as_str())?;
        let sheets = read_tree(source_dir);
        let name = source_dir.file_name().unwrap();
        fs::create_dir_all(destination_dir)?;
        fs::write(destination_dir.join(name), encode_table(&sheets))?;
        Ok(())
    }

    fn unpack_table(&self, source_file: &Utf8Path, destination_dir: &Utf8Path) -> Result<()> {
        self.record("unpack_table", source_file.as_str())?;
        let sheets: BTreeMap<String, Vec<u8>> = serde_json::from_slice(&fs::read(source_file)?)?;
        write_tree(&destination_dir.join(source_file.file_name().unwrap()), &sheets)
    }
}

#[derive(Default)]
pub struct FakeToolchain {
    calls: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(needle: &str) -> Self {
        let toolchain = Self::default();
        *toolchain.fail_on.lock().unwrap() = Some(needle.to_string());
        toolchain
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    fn record(&self, op: &str, name: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{} {}", op, name));
        if let Some(needle) = self.fail_on.lock().unwrap().as_deref() {
            if name.contains(needle) {
                return Err(Error::Other(format!("{} failed on {}", op, name)));
            }
        }
        Ok(())
    }
}

impl ScriptToolchain for FakeToolchain {
    fn decompile_script(
        &self,
        name: &str,
        origin_dir: &Utf8Path,
        destination_dir: &Utf8Path,
        remove_input: bool,
    ) -> Result<()> {
        self.record("decompile", name)?;
        let input = origin_dir.join(name);
        let bytes = fs::read(&input)?;
        let source = bytes.strip_prefix(NUT_MAGIC).unwrap_or(&bytes);
        write_file(&destination_dir.join(swap_extension(name, "txt")), source);
        if remove_input {
            fs::remove_file(&input)?;
        }
        Ok(())
    }

    fn compile_script(
        &self,
        name: &str,
        origin_dir: &Utf8Path,
        destination_dir: &Utf8Path,
        remove_input: bool,
    ) -> Result<()> {
        self.record("compile", name)?;
        let input = origin_dir.join(name);
        let mut compiled = NUT_MAGIC.to_vec();
        compiled.extend(fs::read(&input)?);
        write_file(&destination_dir.join(swap_extension(name, "nut")), &compiled);
        if remove_input {
            fs::remove_file(&input)?;
        }
        Ok(())
    }
}
