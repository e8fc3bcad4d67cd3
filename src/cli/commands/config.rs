//! Config Command
//!
//! Usage:
//!   reportweave config show [-f json]
//!   reportweave config path
//!   reportweave config init [-g] [--force]

use std::path::Path;

use crate::config::{BackendKind, ConfigLoader};
use crate::types::Result;

/// Show the effective configuration and which credentials are present
pub fn show(file: Option<&Path>, format: &str) -> Result<()> {
    let config = match file {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    println!("{}", ConfigLoader::render(&config, format == "json")?);

    println!("# Credentials");
    for kind in BackendKind::ALL {
        let state = if config.credentials.has(kind) { "set" } else { "missing" };
        println!("#   {:<20} {}", kind.credential_var(), state);
    }
    Ok(())
}

/// Show configuration file locations
pub fn path() -> Result<()> {
    match ConfigLoader::global_config_path() {
        Some(global) => {
            let marker = if global.exists() { "" } else { " (not found)" };
            println!("Global:  {}{}", global.display(), marker);
        }
        None => println!("Global:  (cannot determine config directory)"),
    }
    let project = ConfigLoader::project_config_path();
    let marker = if project.exists() { "" } else { " (not found)" };
    println!("Project: {}{}", project.display(), marker);
    Ok(())
}

/// Write a starter config
pub fn init(global: bool, force: bool) -> Result<()> {
    let path = ConfigLoader::init(global, force)?;
    println!("✓ Configuration ready");
    println!("  Config: {}", path.display());
    Ok(())
}
