//! Error types for pipeline operations.
//!
//! All fallible functions in this crate return [`Result<T>`], which uses [`Error`]
//! as the error type. External error types (`std::io::Error`, `serde_json::Error`,
//! `walkdir::Error`) are automatically converted via `From` impls.
//!
//! Step-level failures ([`Bootstrap`](Error::Bootstrap), [`PackJob`](Error::PackJob),
//! [`ArchiveBuild`](Error::ArchiveBuild)) wrap the underlying cause and keep the
//! identity of the resource, file or step that failed.

use crate::install::InstallStep;
use crate::pack::StageKind;
use crate::utils::VirtualPath;
use camino::Utf8PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building and installing the patch archive.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse or serialize JSON (install record, bootstrap manifest).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walking a directory tree failed.
    #[error("Directory walk error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// The worker pool for a pack stage could not be created.
    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// An index could not be built from a mod's content tree.
    #[error("Malformed mod '{mod_id}': {reason}")]
    MalformedMod { mod_id: String, reason: String },

    /// A merge was attempted with zero active mods.
    #[error("No mods activated")]
    NoActiveMods,

    /// Two mods wrote the same path while the merge policy rejects conflicts.
    #[error("Mods [{}] all replace '{path}'", mods.join(", "))]
    MergeConflict { path: VirtualPath, mods: Vec<String> },

    /// A required base asset could not be fetched or decompiled.
    #[error("Failed to bootstrap '{resource}': {source}")]
    Bootstrap {
        resource: String,
        #[source]
        source: Box<Error>,
    },

    /// One file failed to pack or compile.
    #[error("Stage {stage} failed on '{file}': {source}")]
    PackJob {
        stage: StageKind,
        file: Utf8PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// Packing, encrypting, backing up or installing the archive failed.
    #[error("Archive build failed while {step}: {source}")]
    ArchiveBuild {
        step: InstallStep,
        #[source]
        source: Box<Error>,
    },

    /// An external tool exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    Tool {
        tool: String,
        status: String,
        stderr: String,
    },

    /// A line of the static file list could not be parsed.
    #[error("Invalid file list entry on line {line}: {reason}")]
    FileListParse { line: usize, reason: String },

    /// An archive token outside the known archive family.
    #[error("Unknown archive '{0}'")]
    UnknownArchive(String),

    /// A path that cannot be represented in the archive namespace.
    #[error("Invalid virtual path: {0}")]
    InvalidPath(String),

    /// Catch-all for errors from collaborators and other sources.
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn bootstrap(resource: impl ToString, source: Error) -> Self {
        Self::Bootstrap {
            resource: resource.to_string(),
            source: Box::new(source),
        }
    }

    pub fn pack_job(stage: StageKind, file: Utf8PathBuf, source: Error) -> Self {
        Self::PackJob {
            stage,
            file,
            source: Box::new(source),
        }
    }

    pub fn archive_build(step: InstallStep, source: Error) -> Self {
        Self::ArchiveBuild {
            step,
            source: Box::new(source),
        }
    }

    pub fn malformed_mod(mod_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedMod {
            mod_id: mod_id.into(),
            reason: reason.into(),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
