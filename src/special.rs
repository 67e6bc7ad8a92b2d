//! `--update` and `--bored`. Neither touches the query pipeline.

use crate::protocol::SpecialCommand;
use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

const UPDATE_SCRIPT: &str = "update.sh";
const BORED_FILE: &str = "bored.txt";

/// Run a special command against the installation directory.
pub fn run<W: Write>(command: SpecialCommand, install_dir: &Path, out: &mut W) -> Result<()> {
    match command {
        SpecialCommand::Update => update(install_dir, out),
        SpecialCommand::Bored => bored(install_dir, out),
    }
}

fn update<W: Write>(install_dir: &Path, out: &mut W) -> Result<()> {
    let script = install_dir.join(UPDATE_SCRIPT);
    if !script.is_file() {
        writeln!(out, "No updater found at {}.", script.display())?;
        writeln!(out, "To update, re-run the installer from the smart-term repository:")?;
        writeln!(out, "  git pull && ./install.sh")?;
        return Ok(());
    }

    info!("Running updater {}", script.display());
    let status = Command::new("bash")
        .arg(&script)
        .status()
        .with_context(|| format!("Failed to run {}", script.display()))?;
    if !status.success() {
        bail!("Updater exited with {}", status);
    }
    Ok(())
}

fn bored<W: Write>(install_dir: &Path, out: &mut W) -> Result<()> {
    let path = install_dir.join(BORED_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(_) => {
            writeln!(out, "Nothing to cure boredom yet. Add some lines to {}.", path.display())?;
            return Ok(());
        }
    };

    let lines: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        writeln!(out, "{} is empty.", path.display())?;
        return Ok(());
    }

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as usize)
        .unwrap_or(0);
    writeln!(out, "{}", lines[seed % lines.len()])?;
    Ok(())
}
