use super::build_installer;
use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config::AppConfig;
use colored::Colorize;
use dscs_overlay::InstallResult;
use miette::Result;

pub fn install_mods(cfg: &AppConfig) -> Result<()> {
    let installer = build_installer(cfg)?;
    let result = installer.install().map_err(CliError::from)?;
    print_summary(&result);
    Ok(())
}

fn print_summary(result: &InstallResult) {
    println!();
    println_pad!(
        "{} {}",
        "Installed:".bright_green().bold(),
        result.archive.live_path.as_str().bright_white()
    );
    println_pad!("{} {}", "Mods:".bright_cyan(), result.enabled_mods.join(", "));
    println_pad!(
        "{} {} fetched, {} cached",
        "Bootstrap:".bright_cyan(),
        result.bootstrap.fetched(),
        result.bootstrap.already_cached
    );
    println_pad!(
        "{} {} files, {} seeded sheets",
        "Patch:".bright_cyan(),
        result.merge.files_written,
        result.merge.seeded_sheets
    );
    for stage in &result.pack.stages {
        println_pad!(
            "   {} {} {}",
            "•".bright_cyan(),
            stage.kind.to_string().bright_white(),
            format!("({}/{})", stage.completed, stage.total).dimmed()
        );
    }
    if !result.merge.conflicts.is_empty() {
        println_pad!(
            "{} {}",
            "Conflicts:".bright_yellow(),
            result.merge.conflicts.len()
        );
    }
    if result.archive.backup_created {
        println_pad!(
            "{} {}",
            "Backup:".bright_cyan(),
            result.archive.backup_path.as_str()
        );
    }
    println_pad!(
        "{} {:.2?}",
        "Took:".dimmed(),
        result.install_time
    );
}
