use crate::utils::config::{self, AppConfig, LoadedConfig};
use camino::{Utf8Path, Utf8PathBuf};
use colored::Colorize;
use miette::Result;

pub struct InitConfigArgs {
    pub config_path: Option<String>,
    pub game_resources_dir: Option<String>,
    pub force: bool,
}

/// Print a config path entry with status indicator
fn print_path_config(name: &str, path: Option<&Utf8Path>, validator: impl Fn(&Utf8Path) -> bool) {
    match path {
        Some(p) => {
            let status = if validator(p) {
                "✓".bright_green()
            } else {
                "✗".bright_red()
            };
            println!("  {} {} {}", format!("{}:", name).bright_white(), p, status);
        }
        None => {
            println!(
                "  {} {}",
                format!("{}:", name).bright_white(),
                "(not set)".bright_yellow()
            );
        }
    }
}

fn is_file(path: &Utf8Path) -> bool {
    path.as_std_path().is_file()
}

fn is_dir(path: &Utf8Path) -> bool {
    path.as_std_path().is_dir()
}

pub fn show_config(loaded: &LoadedConfig) -> Result<()> {
    let cfg = &loaded.config;

    println!();
    println!("  {} {}", "config_file:".bright_white(), loaded.path);

    print_path_config("game_resources_dir", cfg.game_resources_dir.as_deref(), |p| {
        is_file(&p.join(cfg.target.packed_file_name()))
    });
    print_path_config("output_dir", Some(cfg.output_dir.as_path()), is_dir);
    print_path_config("resources_dir", Some(cfg.resources_dir.as_path()), is_dir);
    print_path_config("backups_dir", Some(cfg.backups_dir.as_path()), is_dir);
    print_path_config("filelist", cfg.filelist.as_deref(), is_file);
    print_path_config("bootstrap_manifest", cfg.bootstrap_manifest.as_deref(), is_file);
    print_path_config("tools.dscstools", Some(cfg.tools.dscstools.as_path()), is_file);
    print_path_config("tools.script_compiler", Some(cfg.tools.script_compiler.as_path()), is_file);
    print_path_config("tools.script_decompiler", Some(cfg.tools.script_decompiler.as_path()), is_file);

    println!("  {} {}", "target:".bright_white(), cfg.target);
    println!("  {} {:?}", "conflict_policy:".bright_white(), cfg.conflict_policy);
    match cfg.workers {
        Some(workers) => println!("  {} {}", "workers:".bright_white(), workers),
        None => println!("  {} {}", "workers:".bright_white(), "(auto)".dimmed()),
    }

    println!();
    println!("  {}", "mods (later entries win):".bright_white());
    if cfg.mods.is_empty() {
        println!("    {}", "(none)".bright_yellow());
    }
    for (i, dir) in cfg.mods.iter().enumerate() {
        print_path_config(&format!("  {}", i + 1), Some(dir.as_path()), |p| is_dir(&p.join("modfiles")));
    }

    println!();
    Ok(())
}

pub fn init_config(args: InitConfigArgs) -> Result<()> {
    let path: Utf8PathBuf = config::config_path(args.config_path.as_deref())?;
    if path.as_std_path().exists() && !args.force {
        return Err(miette::miette!(
            help = "Pass --force to overwrite it",
            "Config file already exists: {}",
            path
        ));
    }

    let cfg = AppConfig {
        game_resources_dir: args.game_resources_dir.map(Utf8PathBuf::from),
        ..Default::default()
    };
    config::save_config(&cfg, &path)?;

    println!(
        "{}",
        "✓ Configuration written".bright_green().bold()
    );
    println!();
    println!("  {} {}", "Config file:".bright_white().bold(), path);
    if cfg.game_resources_dir.is_none() {
        println!();
        println!(
            "  {}",
            "Set game_resources_dir to the game's resources folder before installing".bright_cyan()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "workers = 2").unwrap();

        let result = init_config(InitConfigArgs {
            config_path: Some(path.to_string_lossy().into_owned()),
            game_resources_dir: None,
            force: false,
        });

        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "workers = 2");
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path_str = path.to_string_lossy().into_owned();

        init_config(InitConfigArgs {
            config_path: Some(path_str.clone()),
            game_resources_dir: Some("/games/dscs/resources".to_string()),
            force: true,
        })
        .unwrap();

        let loaded = config::load_config(Some(path_str.as_str())).unwrap();
        assert_eq!(
            loaded.config.game_resources_dir,
            Some(Utf8PathBuf::from("/games/dscs/resources"))
        );
    }
}
