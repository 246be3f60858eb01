//! User configuration, read from a TOML file.
//!
//! Every field has a default, so a missing file or a partial one is fine.
//! Precedence for the data directory: `--data-dir` flag, then the
//! `TODO_DATA_DIR` environment variable, then the file, then the platform default.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::codec::{format_date, DEFAULT_DATE_FORMAT};
use crate::fields::{FilterMode, SortKey};

pub const DATA_DIR_ENV: &str = "TODO_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default)]
    pub list: ListConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            storage_key: default_storage_key(),
            list: ListConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListConfig {
    #[serde(default = "default_filter")]
    pub default_filter: String,
    #[serde(default = "default_sort")]
    pub default_sort: String,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            default_filter: default_filter(),
            default_sort: default_sort(),
        }
    }
}

impl ListConfig {
    pub fn filter(&self) -> FilterMode {
        FilterMode::from_name(&self.default_filter)
    }

    pub fn sort(&self) -> SortKey {
        SortKey::from_name(&self.default_sort)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_text_date_format")]
    pub text_date_format: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
            text_date_format: default_text_date_format(),
        }
    }
}

impl ExportConfig {
    /// Replace a `text_date_format` that cannot format a date with the default.
    pub fn check_date_format(&mut self) {
        let sample = NaiveDate::from_ymd_opt(2000, 1, 31).unwrap_or_default();
        if format_date(sample, &self.text_date_format).is_none() {
            tracing::warn!(
                format = %self.text_date_format,
                "invalid export.text_date_format, using {}",
                DEFAULT_DATE_FORMAT
            );
            self.text_date_format = DEFAULT_DATE_FORMAT.to_string();
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("todo-tracker"))
        .unwrap_or_else(|| PathBuf::from(".todo"))
}

fn default_storage_key() -> String {
    "advanced-todos".to_string()
}

fn default_filter() -> String {
    "all".to_string()
}

fn default_sort() -> String {
    "created".to_string()
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_text_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

/// `<config dir>/todo-tracker/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("todo-tracker").join("config.toml"))
}

impl Config {
    /// Parse a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.export.check_date_format();
        Ok(config)
    }

    /// Load from `explicit` or the default location, then apply the
    /// environment and flag overrides.
    pub fn resolve(explicit: Option<&Path>, data_dir_flag: Option<&Path>) -> Result<Self> {
        let mut config = match explicit.map(Path::to_path_buf).or_else(default_config_path) {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        if let Ok(dir) = env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        if let Some(dir) = data_dir_flag {
            config.data_dir = dir.to_path_buf();
        }
        Ok(config)
    }
}
