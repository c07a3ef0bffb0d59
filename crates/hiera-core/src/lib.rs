//! hiera-core: hierarchical key/value lookups
//!
//! A lookup searches an ordered list of data sources (the hierarchy) through
//! one or more backends, combines what it finds according to a resolution
//! type, and interpolates `%{...}` tokens in the answer.
//!
//! # Example
//!
//! ```rust
//! use hiera_core::backend::{Backend, BackendRegistry, FnBackend, Outcome};
//! use hiera_core::{Config, Hiera, ResolutionType, Value};
//! use indexmap::IndexMap;
//!
//! let mut registry = BackendRegistry::new();
//! registry.register_fn("memory", |_config| {
//!     Ok(Box::new(FnBackend::new("memory", |key, _scope| {
//!         Ok(match key {
//!             "motd" => Outcome::Found(Value::from("Welcome to %{hostname}")),
//!             _ => Outcome::NotFound,
//!         })
//!     })) as Box<dyn Backend>)
//! });
//!
//! let config = Config::from_yaml("backends: [memory]").unwrap();
//! let hiera = Hiera::with_registry(config, &registry).unwrap();
//!
//! let mut scope = IndexMap::new();
//! scope.insert("hostname".to_string(), Value::from("box1"));
//!
//! let motd = hiera
//!     .lookup("motd", Value::Null, &scope, None, ResolutionType::Priority)
//!     .unwrap();
//! assert_eq!(motd.as_str(), Some("Welcome to box1"));
//! ```

pub mod backend;
pub mod error;
pub mod filecache;
pub mod guard;
pub mod interpolation;
pub mod key;
pub mod merge;
pub mod scope;
pub mod value;

mod config;
mod engine;
mod hiera;

pub use backend::{Backend, BackendRegistry, FnBackend, Outcome};
pub use config::{Config, LoggerKind, DEFAULT_CONFIG_PATH};
pub use engine::{Engine, LookupContext};
pub use error::{Error, ErrorKind, Result};
pub use hiera::Hiera;
pub use merge::{DeepMergeOptions, MergeBehavior, MergeStrategy, ResolutionType};
pub use scope::{EmptyScope, Scope};
pub use value::Value;
