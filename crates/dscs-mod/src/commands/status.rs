use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config::AppConfig;
use colored::Colorize;
use dscs_overlay::{installed_archive_is_current, ArchiveKind, InstallRecord};
use miette::Result;

pub fn show_status(cfg: &AppConfig) -> Result<()> {
    let paths = cfg.install_paths()?;
    let record = InstallRecord::load(&paths.record_path()).map_err(CliError::from)?;
    let target = recorded_target(record.as_ref(), cfg.target);
    let origins = paths.origins();
    let live = origins.live_archive(target);
    let backup = origins.backup_archive(target);

    println!();
    println_pad!("{} {}", "target:".bright_white(), target);
    if target != cfg.target {
        println_pad!(
            "{}",
            format!("config now targets {}; run install to switch", cfg.target).bright_yellow()
        );
    }
    println_pad!("{} {} {}", "live archive:".bright_white(), live, mark(live.as_std_path().is_file()));
    println_pad!("{} {} {}", "backup:".bright_white(), backup, mark(backup.as_std_path().is_file()));

    let Some(record) = record else {
        println_pad!("{}", "No mods have been installed yet.".bright_yellow());
        return Ok(());
    };

    println_pad!("{} {}", "installed mods:".bright_white(), record.enabled_mods.join(", "));
    match installed_archive_is_current(&paths, target).map_err(CliError::from)? {
        Some(true) => println_pad!("{} {}", "live archive matches last install".bright_white(), mark(true)),
        _ => println_pad!(
            "{} {}",
            "live archive was changed since the last install (game update?)".bright_yellow(),
            mark(false)
        ),
    }
    Ok(())
}

/// The archive the last install replaced, or `fallback` before the first install.
fn recorded_target(record: Option<&InstallRecord>, fallback: ArchiveKind) -> ArchiveKind {
    match record.map(|r| r.target.parse::<ArchiveKind>()) {
        Some(Ok(kind)) => kind,
        Some(Err(e)) => {
            tracing::warn!("Install record names an unknown archive: {}", e);
            fallback
        }
        None => fallback,
    }
}

fn mark(ok: bool) -> colored::ColoredString {
    if ok {
        "✓".bright_green()
    } else {
        "✗".bright_red()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_recorded_target() {
        let record = InstallRecord::new("DSDBA", vec!["mod-a".to_string()], 7);
        assert_eq!(recorded_target(Some(&record), ArchiveKind::Dsdbp), ArchiveKind::Dsdba);

        let lowercase = InstallRecord::new("dsdba", Vec::new(), 7);
        assert_eq!(recorded_target(Some(&lowercase), ArchiveKind::Dsdbp), ArchiveKind::Dsdba);
    }

    #[test]
    fn test_status_falls_back_to_config_target() {
        assert_eq!(recorded_target(None, ArchiveKind::Dsdbp), ArchiveKind::Dsdbp);

        let unknown = InstallRecord::new("NOPE", Vec::new(), 7);
        assert_eq!(recorded_target(Some(&unknown), ArchiveKind::Dsdbp), ArchiveKind::Dsdbp);
    }
}
