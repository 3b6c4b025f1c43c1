//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.leadlens.toml` files.

use anyhow::{Context, Result};
use leadlens::schema::Schema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".leadlens.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Loader settings.
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,

    /// Value ranges per metric.
    #[serde(default)]
    pub schema: Schema,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Exit with code 2 when rows are rejected.
    #[serde(default)]
    pub fail_on_rejects: bool,
}

/// Input loading settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Maximum files read from an input directory.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
        }
    }
}

fn default_max_files() -> usize {
    1000
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Include the dataset summary section.
    #[serde(default = "default_true")]
    pub include_summary: bool,

    /// Maximum rejected rows listed individually.
    #[serde(default = "default_max_rejections")]
    pub max_rejections_listed: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            include_summary: true,
            max_rejections_listed: default_max_rejections(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_rejections() -> usize {
    20
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .schema
            .check()
            .with_context(|| format!("Invalid [schema] in config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load `.leadlens.toml` from a directory.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(max_files) = args.max_files {
            self.loader.max_files = max_files;
        }

        if args.no_summary {
            self.report.include_summary = false;
        }

        // Flags always override
        if args.fail_on_rejects {
            self.general.fail_on_rejects = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}
