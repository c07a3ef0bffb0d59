//! Top-level lookup entry point

use std::path::Path;

use crate::backend::BackendRegistry;
use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::engine::Engine;
use crate::error::Result;
use crate::merge::ResolutionType;
use crate::scope::Scope;
use crate::value::Value;

/// A configured hiera instance.
///
/// Backends are created once when the instance is built and reused by every
/// lookup.
#[derive(Debug)]
pub struct Hiera {
    engine: Engine,
}

impl Hiera {
    /// Load configuration from `path`, or the default location when `None`
    pub fn from_file(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
        Self::from_config(Config::load(path)?)
    }

    /// Build from a YAML configuration string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_config(Config::from_yaml(yaml)?)
    }

    /// Build from a configuration using the built-in backends
    pub fn from_config(config: Config) -> Result<Self> {
        Self::with_registry(config, &BackendRegistry::with_builtins())
    }

    /// Build from a configuration, taking backends from `registry`
    pub fn with_registry(config: Config, registry: &BackendRegistry) -> Result<Self> {
        log::debug!(
            "Hiera configured with backends {:?} and hierarchy {:?}",
            config.backends,
            config.hierarchy
        );
        Ok(Self {
            engine: Engine::new(config, registry)?,
        })
    }

    /// Look up `key`.
    ///
    /// Returns `default` (interpolated, if it is a string) when no backend
    /// has the key. A key explicitly set to null yields `Value::Null`.
    pub fn lookup(
        &self,
        key: &str,
        default: Value,
        scope: &dyn Scope,
        order_override: Option<&str>,
        resolution: ResolutionType,
    ) -> Result<Value> {
        self.engine
            .lookup(key, default, scope, order_override, &resolution)
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        self.engine.config()
    }

    /// The underlying engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}
