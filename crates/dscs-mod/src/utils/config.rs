//! Application configuration management utilities.
//!
//! The configuration lives in `config.toml` next to the executable unless a
//! path is passed with `--config`. Relative paths inside it are resolved
//! against the directory containing the file.

use crate::errors::CliError;
use camino::{Utf8Path, Utf8PathBuf};
use dscs_overlay::{ArchiveKind, ConflictPolicy, InstallPaths};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// External executables the pipeline shells out to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub dscstools: Utf8PathBuf,
    pub script_compiler: Utf8PathBuf,
    pub script_decompiler: Utf8PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            dscstools: "tools/DSCSTools/DSCSToolsCLI.exe".into(),
            script_compiler: "tools/squirrel/sq.exe".into(),
            script_decompiler: "tools/nutcracker/nutcracker.exe".into(),
        }
    }
}

/// Application-wide configuration stored in config.toml.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// The game's `resources/` directory holding the live `.steam.mvgl` archives.
    pub game_resources_dir: Option<Utf8PathBuf>,
    pub output_dir: Utf8PathBuf,
    pub resources_dir: Utf8PathBuf,
    pub backups_dir: Utf8PathBuf,
    /// `<virtual path>,<ARCHIVE>` lines mapping base resources to archives.
    pub filelist: Option<Utf8PathBuf>,
    /// JSON list of resources to bootstrap on every run.
    pub bootstrap_manifest: Option<Utf8PathBuf>,
    /// Pack stage worker count; defaults to the available parallelism.
    pub workers: Option<usize>,
    pub conflict_policy: ConflictPolicy,
    pub target: ArchiveKind,
    pub tools: ToolsConfig,
    /// Mod directories in activation order. Later entries win.
    pub mods: Vec<Utf8PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            game_resources_dir: None,
            output_dir: "output".into(),
            resources_dir: "resources".into(),
            backups_dir: "backups".into(),
            filelist: Some("config/filelist.csv".into()),
            bootstrap_manifest: None,
            workers: None,
            conflict_policy: ConflictPolicy::default(),
            target: ArchiveKind::Dsdbp,
            tools: ToolsConfig::default(),
            mods: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Make every relative path absolute against `base`.
    pub fn resolve_relative_to(mut self, base: &Utf8Path) -> Self {
        let resolve = |path: &mut Utf8PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };

        if let Some(path) = self.game_resources_dir.as_mut() {
            resolve(path);
        }
        resolve(&mut self.output_dir);
        resolve(&mut self.resources_dir);
        resolve(&mut self.backups_dir);
        if let Some(path) = self.filelist.as_mut() {
            resolve(path);
        }
        if let Some(path) = self.bootstrap_manifest.as_mut() {
            resolve(path);
        }
        resolve(&mut self.tools.dscstools);
        resolve(&mut self.tools.script_compiler);
        resolve(&mut self.tools.script_decompiler);
        self.mods.iter_mut().for_each(resolve);
        self
    }

    pub fn install_paths(&self) -> Result<InstallPaths, CliError> {
        let game_resources_dir = self
            .game_resources_dir
            .clone()
            .ok_or_else(|| CliError::missing_setting("game_resources_dir"))?;
        Ok(InstallPaths {
            game_resources_dir,
            output_dir: self.output_dir.clone(),
            resources_dir: self.resources_dir.clone(),
            backups_dir: self.backups_dir.clone(),
        })
    }

    pub fn log_dir(&self) -> Utf8PathBuf {
        self.output_dir.join("logs")
    }
}

/// A configuration together with the file it was read from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: Utf8PathBuf,
    pub config: AppConfig,
}

/// Returns the directory where the current executable resides.
pub fn install_dir() -> Option<Utf8PathBuf> {
    let exe = env::current_exe().ok()?;
    let parent = exe.parent()?;
    Utf8PathBuf::from_path_buf(parent.to_path_buf()).ok()
}

/// Returns the default configuration file path (config.toml next to the executable).
pub fn default_config_path() -> Option<Utf8PathBuf> {
    install_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// The explicit path if given, else the default one.
pub fn config_path(explicit: Option<&str>) -> Result<Utf8PathBuf, CliError> {
    match explicit {
        Some(path) => Ok(Utf8PathBuf::from(path)),
        None => default_config_path().ok_or(CliError::ConfigLocationUnknown),
    }
}

pub fn parse_config(content: &str, path: &Utf8Path) -> Result<AppConfig, CliError> {
    toml::from_str(content).map_err(|e| CliError::config_parse_error(path.to_path_buf(), Box::new(e)))
}

/// Loads the configuration and resolves its relative paths.
pub fn load_config(explicit: Option<&str>) -> Result<LoadedConfig, CliError> {
    let path = config_path(explicit)?;
    if !path.as_std_path().is_file() {
        return Err(CliError::config_not_found(path));
    }

    let content = fs::read_to_string(path.as_std_path())?;
    let base = path
        .parent()
        .map(Utf8Path::to_path_buf)
        .unwrap_or_else(|| Utf8PathBuf::from("."));
    let config = parse_config(&content, &path)?.resolve_relative_to(&base);

    tracing::debug!("Loaded config from {}", path);
    Ok(LoadedConfig { path, config })
}

/// Saves a configuration to `path`.
pub fn save_config(cfg: &AppConfig, path: &Utf8Path) -> Result<(), CliError> {
    let content = toml::to_string_pretty(cfg)
        .map_err(|e| CliError::config_parse_error(path.to_path_buf(), Box::new(e)))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())?;
    }
    fs::write(path.as_std_path(), content)?;
    Ok(())
}
