//! Hiera configuration
//!
//! Mirrors the layout of `hiera.yaml`:
//!
//! ```yaml
//! :backends:
//!   - yaml
//! :hierarchy:
//!   - "nodes/%{trusted.certname}"
//!   - common
//! :merge_behavior: deeper
//! :deep_merge_options:
//!   :knockout_prefix: "--"
//! :yaml:
//!   :datadir: /etc/puppetlabs/code/environments/%{environment}/hieradata
//! ```
//!
//! Keys may be written with or without the leading `:`. Any top-level key
//! that is not a known setting is kept as a per-backend options section.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::merge::{DeepMergeOptions, MergeBehavior, MergeStrategy};
use crate::value::Value;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/puppetlabs/code/hiera.yaml";

/// Where diagnostics go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerKind {
    /// Log to the console (stderr)
    #[default]
    #[serde(alias = ":console")]
    Console,
    /// Discard all diagnostics
    #[serde(alias = ":noop")]
    Noop,
}

/// Parsed configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend names, consulted in order
    #[serde(alias = ":backends", deserialize_with = "one_or_many")]
    pub backends: Vec<String>,
    /// Data source templates, highest priority first
    #[serde(alias = ":hierarchy", deserialize_with = "one_or_many")]
    pub hierarchy: Vec<String>,
    /// Merge behavior for `hash` lookups
    #[serde(alias = ":merge_behavior")]
    pub merge_behavior: MergeBehavior,
    /// Options for the `deep` and `deeper` merge behaviors
    #[serde(alias = ":deep_merge_options")]
    pub deep_merge_options: DeepMergeOptions,
    /// Diagnostics destination
    #[serde(alias = ":logger")]
    pub logger: LoggerKind,
    /// Every other key: per-backend sections such as `yaml: {datadir: ...}`
    #[serde(flatten)]
    pub backend_options: IndexMap<String, Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backends: vec!["yaml".to_string()],
            hierarchy: vec!["nodes/%{trusted.certname}".to_string(), "common".to_string()],
            merge_behavior: MergeBehavior::default(),
            deep_merge_options: DeepMergeOptions::default(),
            logger: LoggerKind::default(),
            backend_options: IndexMap::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Accept either a single string or a list of strings
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::io(path, "Config file not found")
                .with_help("Pass --config with the path to hiera.yaml"));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io(path, format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content).map_err(|e| e.with_file(path))
    }

    /// Load configuration from a YAML string.
    ///
    /// An empty document yields the defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Option<Config> =
            serde_yaml::from_str(yaml).map_err(|e| Error::parse(e.to_string()))?;
        Ok(config.unwrap_or_default())
    }

    /// Build configuration from an in-memory mapping
    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_mapping() {
            return Err(Error::invalid_configuration(format!(
                "configuration must be a mapping, got {}",
                value.type_name()
            )));
        }
        let yaml = serde_yaml::to_value(value).map_err(|e| Error::parse(e.to_string()))?;
        serde_yaml::from_value(yaml).map_err(|e| Error::parse(e.to_string()))
    }

    /// The merge strategy applied to `hash` lookups without their own
    pub fn merge_strategy(&self) -> MergeStrategy {
        MergeStrategy {
            behavior: self.merge_behavior,
            options: self.deep_merge_options.clone(),
        }
    }

    /// The options section for a backend (`yaml:` or `:yaml:`)
    pub fn backend_section(&self, backend: &str) -> Option<&IndexMap<String, Value>> {
        self.backend_options
            .get(backend)
            .or_else(|| self.backend_options.get(&format!(":{}", backend)))
            .and_then(Value::as_mapping)
    }

    /// A single option from a backend's section (`datadir` or `:datadir`)
    pub fn backend_option(&self, backend: &str, option: &str) -> Option<&Value> {
        let section = self.backend_section(backend)?;
        section
            .get(option)
            .or_else(|| section.get(&format!(":{}", option)))
    }
}
