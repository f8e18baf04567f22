use crate::errors::CliError;
use crate::println_pad;
use camino::Utf8PathBuf;
use colored::Colorize;
use dscs_overlay::{ActiveMod, Category, ModIndex};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

pub struct IndexModArgs {
    pub mod_dir: String,
    pub id: Option<String>,
    pub json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry<'a> {
    category: Category,
    path: String,
    source: &'a str,
}

pub fn index_mod(args: IndexModArgs) -> Result<()> {
    let mod_dir = Utf8PathBuf::from(&args.mod_dir);
    if !mod_dir.as_std_path().is_dir() {
        return Err(CliError::mod_directory_missing(mod_dir).into());
    }
    let active = match args.id {
        Some(id) => ActiveMod::new(id, mod_dir),
        None => ActiveMod::from_dir(mod_dir),
    };
    let index = ModIndex::build(&active.id, &active.mod_dir).map_err(CliError::from)?;

    if args.json {
        let entries: Vec<IndexEntry> = index
            .iter()
            .map(|(category, path, source)| IndexEntry {
                category,
                path: path.to_string(),
                source: source.as_str(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries).into_diagnostic()?);
        return Ok(());
    }

    println_pad!(
        "{} {} {}",
        "Mod:".bright_blue().bold(),
        index.mod_id().bright_cyan().bold(),
        format!("({} files)", index.len()).dimmed()
    );
    for category in Category::ALL {
        let entries: Vec<_> = index.entries(category).collect();
        if entries.is_empty() {
            continue;
        }
        println_pad!(
            "\n{} {}",
            format!("{}:", category).bright_magenta().bold(),
            entries.len()
        );
        for (path, _) in entries {
            println_pad!("   {} {}", "•".bright_cyan(), path);
        }
    }
    Ok(())
}
