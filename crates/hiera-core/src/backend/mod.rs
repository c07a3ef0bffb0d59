//! Backends resolve a key against one data source format
//!
//! Backends are created from a [`BackendRegistry`] by name when an
//! [`Engine`](crate::Engine) is built, and reused for every lookup after
//! that.

mod file;

pub use file::{FileBackend, FileFormat, DEFAULT_DATADIR};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::engine::LookupContext;
use crate::error::{Error, Result};
use crate::interpolation::parse_answer;
use crate::merge::ResolutionType;
use crate::scope::{EmptyScope, Scope};
use crate::value::Value;

/// Result of asking a backend for a key
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The key exists; the value may be null
    Found(Value),
    /// No data source in this backend has the key
    NotFound,
}

impl Outcome {
    /// Whether the key was found
    pub fn is_found(&self) -> bool {
        matches!(self, Outcome::Found(_))
    }

    /// Convert into an option, `None` meaning not found
    pub fn into_option(self) -> Option<Value> {
        match self {
            Outcome::Found(v) => Some(v),
            Outcome::NotFound => None,
        }
    }
}

impl From<Option<Value>> for Outcome {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Outcome::NotFound, Outcome::Found)
    }
}

/// Trait for backend implementations
pub trait Backend: Send + Sync {
    /// Name this backend is registered under
    fn name(&self) -> &str;

    /// Look up a single (undotted) key across the hierarchy.
    ///
    /// # Arguments
    /// * `key` - The key to look up
    /// * `scope` - Variables for interpolation
    /// * `order_override` - Extra source consulted before the hierarchy
    /// * `resolution` - How values from different sources are combined
    /// * `ctx` - The lookup in progress
    fn lookup(
        &self,
        key: &str,
        scope: &dyn Scope,
        order_override: Option<&str>,
        resolution: &ResolutionType,
        ctx: &mut LookupContext<'_>,
    ) -> Result<Outcome>;

    /// Look up a key that has already been split into segments.
    ///
    /// The default looks up the first segment and navigates into the answer
    /// with the rest. Backends able to address nested data directly may
    /// override this.
    fn lookup_with_segments(
        &self,
        segments: &[String],
        full_key: &str,
        scope: &dyn Scope,
        order_override: Option<&str>,
        resolution: &ResolutionType,
        ctx: &mut LookupContext<'_>,
    ) -> Result<Outcome> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(Outcome::NotFound);
        };
        match self.lookup(first, scope, order_override, resolution, ctx)? {
            Outcome::Found(value) if !rest.is_empty() => {
                Ok(value.qualified_lookup(rest, full_key)?.cloned().into())
            }
            outcome => Ok(outcome),
        }
    }
}

impl fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").field("name", &self.name()).finish()
    }
}

/// A backend answering from a closure
///
/// The closure sees the key and the scope. Values it returns are
/// interpolated like data read from files.
pub struct FnBackend<F>
where
    F: Fn(&str, &dyn Scope) -> Result<Outcome> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnBackend<F>
where
    F: Fn(&str, &dyn Scope) -> Result<Outcome> + Send + Sync,
{
    /// Create a new function-based backend
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Backend for FnBackend<F>
where
    F: Fn(&str, &dyn Scope) -> Result<Outcome> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(
        &self,
        key: &str,
        scope: &dyn Scope,
        _order_override: Option<&str>,
        _resolution: &ResolutionType,
        ctx: &mut LookupContext<'_>,
    ) -> Result<Outcome> {
        match (self.func)(key, scope)? {
            Outcome::Found(value) => Ok(Outcome::Found(parse_answer(
                &value,
                scope,
                &EmptyScope,
                ctx,
            )?)),
            Outcome::NotFound => Ok(Outcome::NotFound),
        }
    }
}

/// Constructor for a backend, given the configuration
pub type BackendFactory = Arc<dyn Fn(&Config) -> Result<Box<dyn Backend>> + Send + Sync>;

/// Registry of available backends
#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("BackendRegistry")
            .field("backends", &names)
            .finish()
    }
}

impl BackendRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the `yaml`, `json` and `dynamicyaml` file
    /// backends
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for format in [FileFormat::Yaml, FileFormat::Json, FileFormat::DynamicYaml] {
            registry.register(
                format.name(),
                Arc::new(move |config: &Config| -> Result<Box<dyn Backend>> {
                    Ok(Box::new(FileBackend::new(format, config)?))
                }),
            );
        }
        registry
    }

    /// Register a backend factory, replacing any existing one
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Register a backend factory with optional force overwrite.
    ///
    /// # Returns
    /// * `Ok(())` on success
    /// * `Err(Error)` if force=false and a backend with the same name exists
    pub fn register_with_force(
        &mut self,
        name: impl Into<String>,
        factory: BackendFactory,
        force: bool,
    ) -> Result<()> {
        let name = name.into();
        if !force && self.factories.contains_key(&name) {
            return Err(Error::backend_already_registered(&name));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Register a function as a backend factory
    pub fn register_fn<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Config) -> Result<Box<dyn Backend>> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(factory));
    }

    /// Check if a backend is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Create the backend registered under `name`
    pub fn instantiate(&self, name: &str, config: &Config) -> Result<Box<dyn Backend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::unknown_backend(name))?;
        log::debug!("Hiera {} backend starting", name);
        factory(config)
    }
}
