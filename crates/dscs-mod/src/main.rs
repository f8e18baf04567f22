use clap::builder::{styling::AnsiColor, Styles};
use clap::ColorChoice;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use commands::{
    bootstrap_resources, index_mod, init_config, install_mods, show_config, show_status,
    IndexModArgs, InitConfigArgs,
};
use miette::{IntoDiagnostic, Result};
use utils::config::{load_config, LoadedConfig};
use utils::logging::init_logging;

mod commands;
mod errors;
mod utils;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to config.toml (defaults to the one next to the executable)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Print debug output from the pipeline
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Merge the configured mods, build the patched archive and install it
    Install,
    /// Extract the base tables and scripts the configured mods need
    Bootstrap,
    /// List what a mod directory contributes
    Index {
        /// The mod directory (containing `modfiles/`)
        mod_dir: String,

        /// Mod id to report instead of the directory name
        #[arg(long)]
        id: Option<String>,

        /// Print the index as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the installed archive, its backup and the last install
    Status,
    /// Show or create the configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the current configuration and check its paths
    Show,
    /// Write a default config.toml
    Init {
        /// The game's resources directory
        #[arg(short, long)]
        game_resources_dir: Option<String>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

fn parse_args() -> Result<Args> {
    // Configure colored/styled help output
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default())
        .placeholder(AnsiColor::Blue.on_default());

    let matches = Args::command()
        .styles(styles)
        .color(ColorChoice::Auto)
        .get_matches();

    Args::from_arg_matches(&matches).into_diagnostic()
}

/// Loads the configuration, starts file logging next to the outputs and runs `command`.
fn with_config(
    config_path: Option<&str>,
    verbose: bool,
    command: impl FnOnce(&LoadedConfig) -> Result<()>,
) -> Result<()> {
    let loaded = load_config(config_path)?;
    let _guard = init_logging(Some(&loaded.config.log_dir()), verbose);
    tracing::debug!("Using config {}", loaded.path);
    command(&loaded)
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let config_path = args.config.as_deref();

    match args.command {
        Commands::Install => with_config(config_path, args.verbose, |loaded| {
            install_mods(&loaded.config)
        }),
        Commands::Bootstrap => with_config(config_path, args.verbose, |loaded| {
            bootstrap_resources(&loaded.config)
        }),
        Commands::Status => with_config(config_path, args.verbose, |loaded| {
            show_status(&loaded.config)
        }),
        Commands::Config {
            action: None | Some(ConfigAction::Show),
        } => with_config(config_path, args.verbose, show_config),
        Commands::Config {
            action: Some(ConfigAction::Init {
                game_resources_dir,
                force,
            }),
        } => {
            let _guard = init_logging(None, args.verbose);
            init_config(InitConfigArgs {
                config_path: args.config.clone(),
                game_resources_dir,
                force,
            })
        }
        Commands::Index { mod_dir, id, json } => {
            let _guard = init_logging(None, args.verbose);
            index_mod(IndexModArgs { mod_dir, id, json })
        }
    }
}
