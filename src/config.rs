use crate::error::NsotError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
};

pub const DEFAULT_ATTRIBUTE_NAME_PATTERN: &str = r"^[a-z][a-z0-9_]*$";

/// Dot-separated labels of letters, digits, `-` and `_`; no leading or trailing dot.
pub const DEFAULT_DEVICE_NAME_PATTERN: &str =
    r"^[A-Za-z0-9_]([A-Za-z0-9_-]*[A-Za-z0-9_])?(\.[A-Za-z0-9_]([A-Za-z0-9_-]*[A-Za-z0-9_])?)*$";

pub const DEFAULT_MAX_ATTRIBUTE_NAME_LEN: usize = 64;

static DEFAULT_RULES: Lazy<NameRules> = Lazy::new(|| NameRules {
    attribute_name: Regex::new(DEFAULT_ATTRIBUTE_NAME_PATTERN)
        .expect("Default attribute name pattern to compile"),
    device_name: Regex::new(DEFAULT_DEVICE_NAME_PATTERN)
        .expect("Default device name pattern to compile"),
    max_attribute_name_len: DEFAULT_MAX_ATTRIBUTE_NAME_LEN,
});

/// Settings for an [crate::inventory::Inventory]. Loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NsotConfig {
    pub attribute_name_pattern: String,
    pub device_name_pattern: String,
    pub max_attribute_name_len: usize,
    /// SQLite file used by the `service` feature's value mirror.
    pub database: Option<PathBuf>,
    /// `tracing_subscriber::EnvFilter` directive used by the CLI when RUST_LOG is unset.
    pub log_filter: Option<String>,
}

impl Default for NsotConfig {
    fn default() -> Self {
        NsotConfig {
            attribute_name_pattern: DEFAULT_ATTRIBUTE_NAME_PATTERN.to_string(),
            device_name_pattern: DEFAULT_DEVICE_NAME_PATTERN.to_string(),
            max_attribute_name_len: DEFAULT_MAX_ATTRIBUTE_NAME_LEN,
            database: None,
            log_filter: None,
        }
    }
}

impl NsotConfig {
    pub fn name_rules(&self) -> Result<NameRules, NsotError> {
        Ok(NameRules {
            attribute_name: Regex::new(&self.attribute_name_pattern)?,
            device_name: Regex::new(&self.device_name_pattern)?,
            max_attribute_name_len: self.max_attribute_name_len,
        })
    }
}

/// Compiled naming rules shared by attribute and device validation.
#[derive(Debug, Clone)]
pub struct NameRules {
    pub attribute_name: Regex,
    pub device_name: Regex,
    pub max_attribute_name_len: usize,
}

impl Default for NameRules {
    fn default() -> Self {
        DEFAULT_RULES.clone()
    }
}

pub trait ConfigProvider: Send + Sync {
    fn get_config(&self) -> Result<NsotConfig, NsotError>;
    fn set_config(&self, config: &NsotConfig) -> Result<(), NsotError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get_config(&self) -> Result<NsotConfig, NsotError> {
        tracing::debug!("Attempting to read config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(NsotConfig::default());
        }
        let content = read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }

    fn set_config(&self, config: &NsotConfig) -> Result<(), NsotError> {
        tracing::debug!("Attempting to write config to: {:?}", &self.path);
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}
