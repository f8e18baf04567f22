mod bootstrap;
mod config;
mod index;
mod install;
mod status;

pub use bootstrap::bootstrap_resources;
pub use config::{init_config, show_config, InitConfigArgs};
pub use index::{index_mod, IndexModArgs};
pub use install::install_mods;
pub use status::show_status;

use crate::errors::CliError;
use crate::utils::config::AppConfig;
use crate::utils::print_event;
use dscs_overlay::{
    ActiveMod, BootstrapManifest, DscsTools, ExternalScriptToolchain, FileList, ModInstaller,
};
use std::sync::Arc;

/// Wires a [`ModInstaller`] from the loaded configuration.
pub(crate) fn build_installer(cfg: &AppConfig) -> Result<ModInstaller, CliError> {
    let paths = cfg.install_paths()?;
    let mods = active_mods(cfg)?;

    let codec = Arc::new(DscsTools::new(cfg.tools.dscstools.clone()));
    let toolchain = Arc::new(ExternalScriptToolchain::new(
        cfg.tools.script_compiler.clone(),
        cfg.tools.script_decompiler.clone(),
    ));

    let mut installer = ModInstaller::new(paths, codec, toolchain)
        .with_progress(print_event)
        .with_conflict_policy(cfg.conflict_policy)
        .with_target(cfg.target);

    if let Some(workers) = cfg.workers {
        installer = installer.with_workers(workers);
    }
    if let Some(path) = &cfg.filelist {
        if !path.as_std_path().is_file() {
            return Err(CliError::file_not_found(path.clone()));
        }
        installer = installer.with_file_list(FileList::load(path)?);
    }
    if let Some(path) = &cfg.bootstrap_manifest {
        if !path.as_std_path().is_file() {
            return Err(CliError::file_not_found(path.clone()));
        }
        installer = installer.with_manifest(BootstrapManifest::load(path)?);
    }

    installer.set_active_mods(mods);
    Ok(installer)
}

/// The configured mods in activation order, each checked to exist.
pub(crate) fn active_mods(cfg: &AppConfig) -> Result<Vec<ActiveMod>, CliError> {
    if cfg.mods.is_empty() {
        return Err(CliError::NoModsConfigured);
    }
    cfg.mods
        .iter()
        .map(|dir| {
            if dir.as_std_path().is_dir() {
                Ok(ActiveMod::from_dir(dir.clone()))
            } else {
                Err(CliError::mod_directory_missing(dir.clone()))
            }
        })
        .collect()
}
