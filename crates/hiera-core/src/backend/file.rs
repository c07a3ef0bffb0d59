//! YAML and JSON file backends
//!
//! Each hierarchy source maps to `<datadir>/<source>.<ext>`. Files that do
//! not exist are skipped.
//!
//! The `dynamicyaml` backend reads YAML files too. With
//! `dynamicyaml: {dynamic_prop: roles}` configured, every hierarchy level is
//! searched once per element of the `roles` scope variable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;

use super::{Backend, Outcome};
use crate::config::Config;
use crate::engine::LookupContext;
use crate::error::{Error, Result};
use crate::filecache::FileCache;
use crate::interpolation::{interpolate_str, parse_answer};
use crate::merge::{Accumulator, ResolutionType};
use crate::scope::{EmptyScope, Scope};
use crate::value::{Value, ValueKind};

/// Data directory used when the backend section sets none
pub const DEFAULT_DATADIR: &str = "/etc/puppetlabs/code/environments/%{environment}/hieradata";

/// Format of the data files read by a [`FileBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
    DynamicYaml,
}

impl FileFormat {
    /// Backend name, also the name of its config section
    pub fn name(self) -> &'static str {
        match self {
            FileFormat::Yaml => "yaml",
            FileFormat::Json => "json",
            FileFormat::DynamicYaml => "dynamicyaml",
        }
    }

    /// Data file extension
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Yaml | FileFormat::DynamicYaml => "yaml",
            FileFormat::Json => "json",
        }
    }

    /// Parse a data file. An empty YAML document is an empty mapping.
    pub fn parse(self, content: &str) -> Result<Value> {
        match self {
            FileFormat::Yaml | FileFormat::DynamicYaml => {
                if content.trim().is_empty() {
                    return Ok(Value::Mapping(IndexMap::new()));
                }
                let value: Value = serde_yaml::from_str(content)
                    .map_err(|e| Error::parse(format!("YAML parse error: {}", e)))?;
                Ok(match value {
                    Value::Null => Value::Mapping(IndexMap::new()),
                    other => other,
                })
            }
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| Error::parse(format!("JSON parse error: {}", e))),
        }
    }
}

/// Backend reading one data file per hierarchy source
#[derive(Debug)]
pub struct FileBackend {
    format: FileFormat,
    datadir: String,
    dynamic_prop: Option<String>,
    cache: FileCache,
}

impl FileBackend {
    /// Create a backend, taking its `datadir` from the config section named
    /// after the format.
    pub fn new(format: FileFormat, config: &Config) -> Result<Self> {
        let datadir = match config.backend_option(format.name(), "datadir") {
            None => DEFAULT_DATADIR.to_string(),
            Some(Value::String(dir)) => dir.clone(),
            Some(other) => {
                return Err(Error::invalid_configuration(format!(
                    "datadir for {} cannot be {}",
                    format.name(),
                    other.type_name()
                ))
                .with_help(format!(
                    "Set {}: {{datadir: <path>}} to a single directory",
                    format.name()
                )))
            }
        };

        let dynamic_prop = match format {
            FileFormat::DynamicYaml => match config.backend_option(format.name(), "dynamic_prop") {
                None | Some(Value::Null) => None,
                Some(Value::String(prop)) => Some(prop.clone()),
                Some(other) => {
                    return Err(Error::invalid_configuration(format!(
                        "dynamic_prop for {} cannot be {}",
                        format.name(),
                        other.type_name()
                    )))
                }
            },
            _ => None,
        };

        Ok(Self {
            format,
            datadir,
            dynamic_prop,
            cache: FileCache::new(),
        })
    }

    /// Create a backend reading from `datadir`
    pub fn with_datadir(format: FileFormat, datadir: impl Into<String>) -> Self {
        Self {
            format,
            datadir: datadir.into(),
            dynamic_prop: None,
            cache: FileCache::new(),
        }
    }

    /// Search the hierarchy once per element of the list variable `prop`
    pub fn with_dynamic_prop(mut self, prop: impl Into<String>) -> Self {
        self.dynamic_prop = Some(prop.into());
        self
    }

    /// The configured (uninterpolated) data directory
    pub fn datadir(&self) -> &str {
        &self.datadir
    }

    /// The scope variable driving dynamic hierarchy expansion, if any
    pub fn dynamic_prop(&self) -> Option<&str> {
        self.dynamic_prop.as_deref()
    }

    /// Existing data files for the current lookup, in hierarchy order
    fn datasource_files(
        &self,
        scope: &dyn Scope,
        order_override: Option<&str>,
        ctx: &mut LookupContext<'_>,
    ) -> Result<Vec<(String, PathBuf)>> {
        let datadir =
            interpolate_str(&self.datadir, scope, &EmptyScope, ctx)?.to_interpolated_string();
        let engine = ctx.engine();
        let sources = match &self.dynamic_prop {
            Some(prop) => engine.dynamic_datasources(scope, order_override, None, prop, ctx)?,
            None => engine.datasources(scope, order_override, None, ctx)?,
        };

        let mut files = Vec::with_capacity(sources.len());
        for source in sources {
            log::debug!("Looking for data source {}", source);
            let path = Path::new(&datadir).join(format!("{}.{}", source, self.format.extension()));
            if path.is_file() {
                files.push((source, path));
            } else {
                log::debug!("Cannot find datafile {}, skipping", path.display());
            }
        }
        Ok(files)
    }

    fn read(&self, path: &Path) -> Result<Arc<Value>> {
        let format = self.format;
        match format {
            FileFormat::Yaml | FileFormat::DynamicYaml => {
                self.cache
                    .read_file(path, ValueKind::Mapping, |content| format.parse(content))
            }
            FileFormat::Json => self.cache.read(
                path,
                ValueKind::Mapping,
                Value::Mapping(IndexMap::new()),
                |content| format.parse(content),
            ),
        }
    }
}

impl Backend for FileBackend {
    fn name(&self) -> &str {
        self.format.name()
    }

    fn lookup(
        &self,
        key: &str,
        scope: &dyn Scope,
        order_override: Option<&str>,
        resolution: &ResolutionType,
        ctx: &mut LookupContext<'_>,
    ) -> Result<Outcome> {
        log::debug!("Looking up {} in {} backend", key, self.format.name().to_uppercase());

        let strategy = ctx.engine().merge_strategy();
        let mut answer = Accumulator::new(key, resolution, strategy);

        for (source, path) in self.datasource_files(scope, order_override, ctx)? {
            let data = self.read(&path)?;
            let Some(raw) = data.as_mapping().and_then(|m| m.get(key)) else {
                continue;
            };
            log::debug!("Found {} in {}", key, source);

            let value = parse_answer(raw, scope, &EmptyScope, ctx)?;
            if answer.push(value)?.is_break() {
                break;
            }
        }

        Ok(answer.finish().into())
    }
}
