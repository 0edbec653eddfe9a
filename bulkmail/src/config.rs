//! Locating and loading the RON configuration file

use std::path::{Path, PathBuf};

use crate::controller::Bulkmail;

pub const CONFIG_ENV: &str = "BULKMAIL_CONFIG";

/// Searched in order when `BULKMAIL_CONFIG` is not set
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = [
    "./bulkmail.config.ron",
    "/etc/bulkmail/bulkmail.config.ron",
];

/// Find the configuration file using the following precedence:
/// 1. `BULKMAIL_CONFIG` environment variable
/// 2. ./bulkmail.config.ron (current working directory)
/// 3. /etc/bulkmail/bulkmail.config.ron (system-wide config)
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    let defaults = DEFAULT_CONFIG_PATHS.map(PathBuf::from);
    find_config_file_in(std::env::var(CONFIG_ENV).ok(), &defaults)
}

fn find_config_file_in(env_path: Option<String>, defaults: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(env_path) = env_path {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// Read and parse a configuration file
pub fn load(path: &Path) -> anyhow::Result<Bulkmail> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
    })?;
    ron::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))
}
