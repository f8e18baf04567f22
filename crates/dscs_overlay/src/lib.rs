//! Mod overlay build pipeline for Digimon Story Cyber Sleuth.
//!
//! This crate merges any number of mods into a single patch for the game's
//! `.mvgl` archives and installs it. It supports:
//!
//! - **Priority merging**: later mods override earlier ones, with a configurable
//!   conflict policy
//! - **Lazy bootstrapping**: base tables and scripts are extracted from the
//!   game on first use and cached
//! - **Parallel packing**: tables and scripts are packed/compiled stage by
//!   stage on a bounded worker pool
//! - **Safe installs**: the original archive is backed up once and the live
//!   archive is only replaced after the patched one has been built
//!
//! The binary formats are handled by external tools behind the
//! [`ArchiveCodec`] and [`ScriptToolchain`] traits.
//!
//! # Example
//!
//! ```no_run
//! use dscs_overlay::{ActiveMod, DscsTools, ExternalScriptToolchain, InstallPaths, ModInstaller};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let paths = InstallPaths {
//!     game_resources_dir: "C:/Games/DSCS/resources".into(),
//!     output_dir: "output".into(),
//!     resources_dir: "resources".into(),
//!     backups_dir: "backups".into(),
//! };
//! let codec = Arc::new(DscsTools::new("tools/DSCSToolsCLI.exe"));
//! let scripts = Arc::new(ExternalScriptToolchain::new("tools/nutcomp.exe", "tools/nutdecomp.exe"));
//!
//! let mut installer = ModInstaller::new(paths, codec, scripts)
//!     .with_progress(|event| println!("{:?}", event));
//! installer.set_active_mods(vec![ActiveMod::from_dir("mods/my-mod")]);
//!
//! let result = installer.install()?;
//! println!("Installed {} mods into {}", result.enabled_mods.len(), result.archive.live_path);
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod builder;
pub mod cache;
pub mod codec;
pub mod error;
pub mod filelist;
pub mod index;
pub mod install;
pub mod merge;
pub mod pack;
pub mod progress;
pub mod state;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export main types
pub use bootstrap::{ArchiveOrigins, BootstrapManifest, BootstrapReport, Bootstrapper};
pub use builder::{installed_archive_is_current, ActiveMod, InstallPaths, InstallResult, ModInstaller};
pub use cache::{Resource, ResourceCache};
pub use codec::{ArchiveCodec, DscsTools, ExternalScriptToolchain, ScriptToolchain};
pub use error::{Error, Result};
pub use filelist::{ArchiveKind, FileList};
pub use index::{Category, ModIndex, TableKind};
pub use install::{ArchiveInstaller, InstallStep, InstalledArchive};
pub use merge::{Conflict, ConflictPolicy, MergeReport, PatchMerger, PatchTree};
pub use pack::{PackPipeline, PipelineReport, StageKind, StageReport};
pub use progress::{EventSink, InstallEvent};
pub use state::InstallRecord;
pub use utils::VirtualPath;
