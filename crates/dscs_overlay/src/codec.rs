//! Collaborator seams for archive and script tooling.
//!
//! The binary layouts of `.mvgl` archives, MBE tables and compiled scripts are
//! owned by external tools. The pipeline only sees the [`ArchiveCodec`] and
//! [`ScriptToolchain`] traits, calls them synchronously, and treats any error as
//! fatal to the current step.
//!
//! [`DscsTools`] and [`ExternalScriptToolchain`] are the production
//! implementations; they shell out to the respective executables.

use crate::error::{Error, Result};
use crate::filelist::ArchiveKind;
use crate::utils::{remove_if_exists, VirtualPath};
use camino::{Utf8Path, Utf8PathBuf};
use std::process::Command;

/// Packs, unpacks and encrypts the game's archives and tables.
///
/// Implementations must be shareable across the pack stage's worker threads.
pub trait ArchiveCodec: Send + Sync {
    /// Unpack `origin_dir/<NAME>.steam.mvgl` into `destination_dir/<NAME>/`.
    fn unpack(&self, kind: ArchiveKind, origin_dir: &Utf8Path, destination_dir: &Utf8Path)
        -> Result<()>;

    /// Pack `source_dir/<NAME>/` into `destination_dir/<NAME>.decrypt.mvgl`.
    fn pack(
        &self,
        kind: ArchiveKind,
        source_dir: &Utf8Path,
        destination_dir: &Utf8Path,
        remove_input: bool,
    ) -> Result<()>;

    /// Encrypt `source_dir/<NAME>.decrypt.mvgl` into `destination_dir/<NAME>.steam.mvgl`.
    fn encrypt(
        &self,
        kind: ArchiveKind,
        source_dir: &Utf8Path,
        destination_dir: &Utf8Path,
        remove_input: bool,
    ) -> Result<()>;

    /// Extract one entry of `origin_dir/<NAME>.steam.mvgl` to
    /// `destination_dir/<entry>`, returning the written path.
    fn extract_entry(
        &self,
        kind: ArchiveKind,
        entry: &VirtualPath,
        origin_dir: &Utf8Path,
        destination_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf>;

    /// Pack the table source directory `<name>.mbe/` into `destination_dir/<name>.mbe`.
    fn pack_table(&self, source_dir: &Utf8Path, destination_dir: &Utf8Path) -> Result<()>;

    /// Unpack the table file `<name>.mbe` into `destination_dir/<name>.mbe/`.
    fn unpack_table(&self, source_file: &Utf8Path, destination_dir: &Utf8Path) -> Result<()>;
}

/// Compiles and decompiles game scripts, one file at a time.
///
/// `compile_script` turns `origin_dir/<stem>.txt` into `destination_dir/<stem>.nut`;
/// `decompile_script` does the reverse. With `remove_input` the input file is
/// deleted once the output has been written.
pub trait ScriptToolchain: Send + Sync {
    fn decompile_script(
        &self,
        name: &str,
        origin_dir: &Utf8Path,
        destination_dir: &Utf8Path,
        remove_input: bool,
    ) -> Result<()>;

    fn compile_script(
        &self,
        name: &str,
        origin_dir: &Utf8Path,
        destination_dir: &Utf8Path,
        remove_input: bool,
    ) -> Result<()>;
}

/// Replace the extension of a bare file name.
pub fn swap_extension(name: &str, extension: &str) -> String {
    let stem = match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    };
    format!("{}.{}", stem, extension)
}

/// Run an external tool and map a non-zero exit into [`Error::Tool`].
fn run_tool(program: &Utf8Path, args: &[&str]) -> Result<()> {
    tracing::debug!("Running {} {}", program, args.join(" "));

    let output = Command::new(program.as_std_path()).args(args).output()?;
    if !output.status.success() {
        return Err(Error::Tool {
            tool: program.file_name().unwrap_or(program.as_str()).to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// [`ArchiveCodec`] backed by the `DSCSToolsCLI` executable.
#[derive(Debug, Clone)]
pub struct DscsTools {
    executable: Utf8PathBuf,
}

impl DscsTools {
    pub fn new(executable: impl Into<Utf8PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Utf8Path {
        &self.executable
    }
}

impl ArchiveCodec for DscsTools {
    fn unpack(
        &self,
        kind: ArchiveKind,
        origin_dir: &Utf8Path,
        destination_dir: &Utf8Path,
    ) -> Result<()> {
        let source = origin_dir.join(kind.packed_file_name());
        let target = destination_dir.join(kind.unpacked_dir_name());
        run_tool(&self.executable, &["--extract", source.as_str(), target.as_str()])
    }

    fn pack(
        &self,
        kind: ArchiveKind,
        source_dir: &Utf8Path,
        destination_dir: &Utf8Path,
        remove_input: bool,
    ) -> Result<()> {
        let source = source_dir.join(kind.unpacked_dir_name());
        let target = destination_dir.join(kind.decrypted_file_name());
        run_tool(
            &self.executable,
            &["--pack", source.as_str(), target.as_str(), "--compress"],
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
        let target = destination_dir.join(kind.packed_file_name());
        run_tool(&self.executable, &["--crypt", source.as_str(), target.as_str()])?;
        if remove_input {
            remove_if_exists(&source)?;
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
        let source = origin_dir.join(kind.packed_file_name());
        run_tool(
            &self.executable,
            &[
                "--extract-file",
                source.as_str(),
                destination_dir.as_str(),
                entry.as_str(),
            ],
        )?;

        let written = entry.to_fs_path(destination_dir);
        if !written.as_std_path().is_file() {
            return Err(Error::Other(format!(
                "DSCSTools did not extract '{}' from {}",
                entry, source
            )));
        }
        Ok(written)
    }

    fn pack_table(&self, source_dir: &Utf8Path, destination_dir: &Utf8Path) -> Result<()> {
        let name = source_dir
            .file_name()
            .ok_or_else(|| Error::InvalidPath(source_dir.to_string()))?;
        let target = destination_dir.join(name);
        run_tool(
            &self.executable,
            &["--mbepack", source_dir.as_str(), target.as_str()],
        )
    }

    fn unpack_table(&self, source_file: &Utf8Path, destination_dir: &Utf8Path) -> Result<()> {
        let name = source_file
            .file_name()
            .ok_or_else(|| Error::InvalidPath(source_file.to_string()))?;
        let target = destination_dir.join(name);
        run_tool(
            &self.executable,
            &["--mbeextract", source_file.as_str(), target.as_str()],
        )
    }
}

/// [`ScriptToolchain`] that runs a compiler and a decompiler executable, each
/// invoked as `<program> <input> <output>`.
#[derive(Debug, Clone)]
pub struct ExternalScriptToolchain {
    compiler: Utf8PathBuf,
    decompiler: Utf8PathBuf,
}

impl ExternalScriptToolchain {
    pub fn new(compiler: impl Into<Utf8PathBuf>, decompiler: impl Into<Utf8PathBuf>) -> Self {
        Self {
            compiler: compiler.into(),
            decompiler: decompiler.into(),
        }
    }

    fn convert(
        program: &Utf8Path,
        name: &str,
        output_extension: &str,
        origin_dir: &Utf8Path,
        destination_dir: &Utf8Path,
        remove_input: bool,
    ) -> Result<()> {
        let input = origin_dir.join(name);
        let output = destination_dir.join(swap_extension(name, output_extension));
        std::fs::create_dir_all(destination_dir.as_std_path())?;

        run_tool(program, &[input.as_str(), output.as_str()])?;
        if !output.as_std_path().is_file() {
            return Err(Error::Other(format!(
                "{} produced no output for {}",
                program, input
            )));
        }
        if remove_input {
            std::fs::remove_file(input.as_std_path())?;
        }
        Ok(())
    }
}

impl ScriptToolchain for ExternalScriptToolchain {
    fn decompile_script(
        &self,
        name: &str,
        origin_dir: &Utf8Path,
        destination_dir: &Utf8Path,
        remove_input: bool,
    ) -> Result<()> {
        Self::convert(
            &self.decompiler,
            name,
            "txt",
            origin_dir,
            destination_dir,
            remove_input,
        )
    }

    fn compile_script(
        &self,
        name: &str,
        origin_dir: &Utf8Path,
        destination_dir: &Utf8Path,
        remove_input: bool,
    ) -> Result<()> {
        Self::convert(
            &self.compiler,
            name,
            "nut",
            origin_dir,
            destination_dir,
            remove_input,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_extension() {
        assert_eq!(swap_extension("t1001.txt", "nut"), "t1001.nut");
        assert_eq!(swap_extension("t1001", "nut"), "t1001.nut");
        assert_eq!(swap_extension(".hidden", "nut"), ".hidden.nut");
        assert_eq!(swap_extension("a.b.txt", "nut"), "a.b.nut");
    }

    #[test]
    fn test_missing_tool_is_an_error() {
        let tools = DscsTools::new("/nonexistent/DSCSToolsCLI");
        let err = tools
            .pack_table(Utf8Path::new("/tmp/a.mbe"), Utf8Path::new("/tmp"))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
