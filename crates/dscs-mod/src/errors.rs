use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Configuration file not found: {search_path}")]
    #[diagnostic(
        code(config::not_found),
        help("Run `dscs-mod config init` to create a config.toml next to the executable, or pass --config <path>")
    )]
    ConfigNotFound { search_path: Utf8PathBuf },

    #[error("Configuration file error in {path}")]
    #[diagnostic(
        code(config::parse_error),
        help("Check your config.toml file for syntax errors")
    )]
    ConfigParseError {
        path: Utf8PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Missing configuration setting: {key}")]
    #[diagnostic(
        code(config::missing_setting),
        help("Set `{key}` in config.toml (see `dscs-mod config show`)")
    )]
    MissingSetting { key: String },

    #[error("Could not determine the config path")]
    #[diagnostic(
        code(config::no_location),
        help("Pass the config file explicitly with --config <path>")
    )]
    ConfigLocationUnknown,

    #[error("No mods configured")]
    #[diagnostic(
        code(install::no_mods),
        help("Add mod directories to the `mods` list in config.toml. Later entries win conflicts.")
    )]
    NoModsConfigured,

    #[error("Mod directory not found: {path}")]
    #[diagnostic(
        code(mod_dir::not_found),
        help("Each mod is a directory containing a `modfiles/` folder")
    )]
    ModDirectoryMissing { path: Utf8PathBuf },

    #[error("File not found: {path}")]
    #[diagnostic(
        code(file::not_found),
        help("Make sure the file exists and the path is correct")
    )]
    FileNotFound { path: Utf8PathBuf },

    #[error("Install pipeline failed")]
    #[diagnostic(code(pipeline::failed))]
    Pipeline {
        #[source]
        source: dscs_overlay::Error,
        #[help]
        help: Option<String>,
    },

    #[error("IO operation failed")]
    #[diagnostic(code(io::operation_failed))]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn config_not_found(search_path: Utf8PathBuf) -> Self {
        Self::ConfigNotFound { search_path }
    }

    pub fn config_parse_error(
        path: Utf8PathBuf,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::ConfigParseError { path, source }
    }

    pub fn missing_setting(key: impl Into<String>) -> Self {
        Self::MissingSetting { key: key.into() }
    }

    pub fn mod_directory_missing(path: Utf8PathBuf) -> Self {
        Self::ModDirectoryMissing { path }
    }

    pub fn file_not_found(path: Utf8PathBuf) -> Self {
        Self::FileNotFound { path }
    }
}

impl From<dscs_overlay::Error> for CliError {
    fn from(source: dscs_overlay::Error) -> Self {
        use dscs_overlay::Error;

        let help = match &source {
            Error::NoActiveMods => Some("Enable at least one mod in config.toml".to_string()),
            Error::MalformedMod { .. } => Some(
                "Table sheets must live under modfiles/mbe/<data|message|text>/<name>.mbe/"
                    .to_string(),
            ),
            Error::MergeConflict { .. } => Some(
                "Disable one of the conflicting mods or set conflict_policy = \"report-conflict\""
                    .to_string(),
            ),
            Error::Bootstrap { .. } => Some(
                "Make sure game_resources_dir points at the game's resources folder and the filelist is current"
                    .to_string(),
            ),
            Error::Tool { .. } | Error::PackJob { .. } => {
                Some("Check the tool paths in the [tools] section of config.toml".to_string())
            }
            Error::ArchiveBuild { .. } => Some(
                "Check free disk space and write permissions for the output, backups and game directories"
                    .to_string(),
            ),
            _ => None,
        };
        Self::Pipeline { source, help }
    }
}
