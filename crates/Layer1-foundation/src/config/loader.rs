//! Configuration loader
//!
//! ## Search order
//!
//! 1. User-level: `<config_dir>/taskline/config.toml`
//! 2. Project-level: `.taskline/config.toml`
//! 3. Local (uncommitted): `.taskline/config.local.toml`
//!
//! Each level overrides the keys it sets; tables are merged key by key.

use super::settings::{TasklineConfig, CONFIG_FILE, LOCAL_CONFIG_FILE};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Project config directory name
pub const CONFIG_DIR_NAME: &str = ".taskline";

/// Config file location
#[derive(Debug, Clone)]
struct ConfigPath {
    path: PathBuf,
    /// Higher wins
    priority: u8,
    description: &'static str,
}

/// Layered config loader
pub struct ConfigLoader {
    search_paths: Vec<ConfigPath>,
}

impl ConfigLoader {
    /// Loader with the default search paths
    pub fn new(working_dir: &Path) -> Self {
        let mut paths = Vec::new();

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(ConfigPath {
                path: config_dir.join("taskline").join(CONFIG_FILE),
                priority: 10,
                description: "User settings",
            });
        }

        paths.push(ConfigPath {
            path: working_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE),
            priority: 20,
            description: "Project settings",
        });

        paths.push(ConfigPath {
            path: working_dir.join(CONFIG_DIR_NAME).join(LOCAL_CONFIG_FILE),
            priority: 30,
            description: "Local settings",
        });

        paths.sort_by_key(|p| p.priority);

        Self {
            search_paths: paths,
        }
    }

    /// Loader over explicit paths, later paths win
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        let search_paths = paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| ConfigPath {
                path,
                priority: i as u8,
                description: "Custom",
            })
            .collect();

        Self { search_paths }
    }

    /// Load every existing file and merge them. Unparseable files are
    /// skipped with a warning.
    pub fn load_all(&self) -> Result<TasklineConfig> {
        let mut merged = toml::Table::new();

        for config_path in &self.search_paths {
            if !config_path.path.exists() {
                continue;
            }
            match read_table(&config_path.path) {
                Ok(table) => {
                    info!(
                        "Loaded {} from: {}",
                        config_path.description,
                        config_path.path.display()
                    );
                    merge_tables(&mut merged, table);
                }
                Err(e) => {
                    warn!(
                        "Failed to load settings from {}: {}",
                        config_path.path.display(),
                        e
                    );
                }
            }
        }

        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| Error::Config(e.to_string()))
    }

    /// Load a single file strictly
    pub fn load_from(&self, path: &Path) -> Result<TasklineConfig> {
        if !path.exists() {
            return Err(Error::Config(format!("{} does not exist", path.display())));
        }
        let table = read_table(path)?;
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| {
                Error::Config(format!("Invalid settings at {}: {}", path.display(), e))
            })
    }

    /// Existing config files, lowest priority first
    pub fn existing_files(&self) -> Vec<PathBuf> {
        self.search_paths
            .iter()
            .filter(|p| p.path.exists())
            .map(|p| p.path.clone())
            .collect()
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    let table: toml::Table = content
        .parse()
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
    debug!("Read {} top-level keys from {}", table.len(), path.display());
    Ok(table)
}

/// Merge `later` into `earlier`, recursing into nested tables
fn merge_tables(earlier: &mut toml::Table, later: toml::Table) {
    for (key, value) in later {
        match (earlier.get_mut(&key), value) {
            (Some(toml::Value::Table(base)), toml::Value::Table(overlay)) => {
                merge_tables(base, overlay)
            }
            (_, value) => {
                earlier.insert(key, value);
            }
        }
    }
}
