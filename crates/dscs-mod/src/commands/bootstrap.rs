use super::build_installer;
use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config::AppConfig;
use colored::Colorize;
use miette::Result;

pub fn bootstrap_resources(cfg: &AppConfig) -> Result<()> {
    let installer = build_installer(cfg)?;
    let report = installer.bootstrap_only().map_err(CliError::from)?;

    println!();
    println_pad!(
        "{} {} required, {} already cached",
        "Resources:".bright_cyan().bold(),
        report.required,
        report.already_cached
    );
    for table in &report.fetched_tables {
        println_pad!("   {} table {}", "+".bright_green(), table);
    }
    for script in &report.fetched_scripts {
        println_pad!("   {} script {}", "+".bright_green(), script);
    }
    if !report.unknown.is_empty() {
        println_pad!(
            "{}",
            "No base archive ships these; they are used as-is:".bright_yellow()
        );
        for resource in &report.unknown {
            println_pad!("   {} {}", "?".bright_yellow(), resource);
        }
    }
    Ok(())
}
