//! Resolution types and merge policies
//!
//! A lookup combines the values found at different hierarchy levels (and in
//! different backends) according to its resolution type:
//! - `priority`: the first value found wins
//! - `array`: every value found is collected into one flat, de-duplicated array
//! - `hash`: every value found must be a mapping, and they are merged
//!
//! Hash merges follow the configured `merge_behavior`:
//! - `native`: shallow merge, higher priority keys win
//! - `deeper`: recursive merge, higher priority scalars win
//! - `deep`: recursive merge, lower priority scalars win
//!
//! Recursive merges union arrays (lower priority elements first) and honour
//! the `knockout_prefix` and `sort_merged_arrays` options.

use std::fmt;
use std::ops::ControlFlow;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

/// How values for one key are combined across sources
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResolutionType {
    /// First match wins
    #[default]
    Priority,
    /// Collect, flatten and de-duplicate every match
    Array,
    /// Merge every match; `None` uses the configured merge strategy
    Hash(Option<MergeStrategy>),
}

impl ResolutionType {
    /// Short name as used on the command line and in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            ResolutionType::Priority => "priority",
            ResolutionType::Array => "array",
            ResolutionType::Hash(_) => "hash",
        }
    }
}

impl fmt::Display for ResolutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResolutionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim_start_matches(':') {
            "priority" => Ok(ResolutionType::Priority),
            "array" => Ok(ResolutionType::Array),
            "hash" => Ok(ResolutionType::Hash(None)),
            other => Err(Error::invalid_configuration(format!(
                "Unknown resolution type '{}', expected priority, array or hash",
                other
            ))),
        }
    }
}

/// Hash merge behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeBehavior {
    /// Shallow merge
    #[default]
    #[serde(alias = ":native")]
    Native,
    /// Recursive merge, lower priority scalars win
    #[serde(alias = ":deep")]
    Deep,
    /// Recursive merge, higher priority scalars win
    #[serde(alias = ":deeper")]
    Deeper,
}

/// Options for the recursive merge behaviors
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepMergeOptions {
    /// Prefix marking values to delete from the merged result
    #[serde(alias = ":knockout_prefix")]
    pub knockout_prefix: Option<String>,
    /// Sort arrays after merging them
    #[serde(alias = ":sort_merged_arrays")]
    pub sort_merged_arrays: bool,
}

/// Merge behavior together with its options
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeStrategy {
    pub behavior: MergeBehavior,
    pub options: DeepMergeOptions,
}

impl MergeStrategy {
    /// Strategy with default options
    pub fn new(behavior: MergeBehavior) -> Self {
        Self {
            behavior,
            options: DeepMergeOptions::default(),
        }
    }

    /// Set the knockout prefix
    pub fn with_knockout_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.knockout_prefix = Some(prefix.into());
        self
    }

    /// Sort merged arrays
    pub fn with_sorted_arrays(mut self) -> Self {
        self.options.sort_merged_arrays = true;
        self
    }
}

/// Merge two mappings found for the same key.
///
/// `lower` comes from the lower priority source, `higher` from the higher
/// priority one (everything accumulated so far).
pub fn merge_answer(
    lower: IndexMap<String, Value>,
    higher: IndexMap<String, Value>,
    strategy: &MergeStrategy,
) -> IndexMap<String, Value> {
    match strategy.behavior {
        MergeBehavior::Native => {
            let mut merged = lower;
            merged.extend(higher);
            merged
        }
        MergeBehavior::Deep => {
            DeepMerger::new(&strategy.options, false).merge_mappings(lower, higher)
        }
        MergeBehavior::Deeper => {
            DeepMerger::new(&strategy.options, true).merge_mappings(lower, higher)
        }
    }
}

/// Recursive merge of a winning-or-losing `source` into a `dest`.
///
/// `source` is always the higher priority side; `overwrite` decides whether
/// it also wins scalar conflicts.
struct DeepMerger<'a> {
    knockout_prefix: Option<&'a str>,
    sort_merged_arrays: bool,
    overwrite: bool,
}

impl<'a> DeepMerger<'a> {
    fn new(options: &'a DeepMergeOptions, overwrite: bool) -> Self {
        Self {
            knockout_prefix: options.knockout_prefix.as_deref().filter(|p| !p.is_empty()),
            sort_merged_arrays: options.sort_merged_arrays,
            overwrite,
        }
    }

    fn knocked_out<'v>(&self, value: &'v Value) -> Option<&'v str> {
        let prefix = self.knockout_prefix?;
        value.as_str()?.strip_prefix(prefix)
    }

    fn merge(&self, dest: Value, source: Value) -> Value {
        match (dest, source) {
            (Value::Mapping(dest), Value::Mapping(source)) => {
                Value::Mapping(self.merge_mappings(dest, source))
            }
            (Value::Sequence(dest), Value::Sequence(source)) => {
                Value::Sequence(self.merge_sequences(dest, source))
            }
            (Value::Null, source) => self.strip_knockouts(source),
            (dest, source) => {
                if self.overwrite {
                    source
                } else {
                    dest
                }
            }
        }
    }

    fn merge_mappings(
        &self,
        mut dest: IndexMap<String, Value>,
        source: IndexMap<String, Value>,
    ) -> IndexMap<String, Value> {
        for (key, src_value) in source {
            if self.overwrite && self.knocked_out(&src_value).is_some() {
                dest.shift_remove(&key);
                continue;
            }
            match dest.get_mut(&key) {
                Some(dest_value) => {
                    let existing = std::mem::take(dest_value);
                    *dest_value = self.merge(existing, src_value);
                }
                None => {
                    let value = self.strip_knockouts(src_value);
                    dest.insert(key, value);
                }
            }
        }
        dest
    }

    fn merge_sequences(&self, mut dest: Vec<Value>, source: Vec<Value>) -> Vec<Value> {
        let mut additions = Vec::with_capacity(source.len());

        for item in source {
            match self.knocked_out(&item) {
                // A bare prefix clears everything merged so far
                Some("") => dest.clear(),
                Some(target) => {
                    let target = Value::from(target);
                    dest.retain(|v| v != &target);
                    additions.retain(|v| v != &target);
                }
                None => additions.push(item),
            }
        }

        let mut merged: Vec<Value> = Vec::with_capacity(dest.len() + additions.len());
        for item in dest.into_iter().chain(additions) {
            if !merged.contains(&item) {
                merged.push(item);
            }
        }
        if self.sort_merged_arrays {
            merged.sort_by(|a, b| a.total_cmp(b));
        }
        merged
    }

    /// Drop knockout markers from a value that has nothing to merge with
    fn strip_knockouts(&self, value: Value) -> Value {
        if self.knockout_prefix.is_none() {
            return value;
        }
        match value {
            Value::Sequence(items) => Value::Sequence(
                items
                    .into_iter()
                    .filter(|item| self.knocked_out(item).is_none())
                    .map(|item| self.strip_knockouts(item))
                    .collect(),
            ),
            Value::Mapping(map) => Value::Mapping(
                map.into_iter()
                    .filter(|(_, v)| self.knocked_out(v).is_none())
                    .map(|(k, v)| (k, self.strip_knockouts(v)))
                    .collect(),
            ),
            other => other,
        }
    }
}

/// Combines the values found for one key, in priority order.
///
/// Used both across the hierarchy sources of a backend and across backends.
#[derive(Debug)]
pub struct Accumulator<'a> {
    key: &'a str,
    resolution: &'a ResolutionType,
    strategy: &'a MergeStrategy,
    answer: Option<Value>,
}

impl<'a> Accumulator<'a> {
    /// Create an accumulator for `key`.
    ///
    /// `default_strategy` applies to `hash` resolutions that carry no
    /// strategy of their own.
    pub fn new(
        key: &'a str,
        resolution: &'a ResolutionType,
        default_strategy: &'a MergeStrategy,
    ) -> Self {
        let strategy = match resolution {
            ResolutionType::Hash(Some(strategy)) => strategy,
            _ => default_strategy,
        };
        Self {
            key,
            resolution,
            strategy,
            answer: None,
        }
    }

    /// Whether any value has been accepted
    pub fn found(&self) -> bool {
        self.answer.is_some()
    }

    /// Add the next (lower priority) value.
    ///
    /// Returns `Break` when no further sources need to be consulted.
    pub fn push(&mut self, value: Value) -> Result<ControlFlow<()>> {
        match self.resolution {
            ResolutionType::Priority => {
                self.answer = Some(value);
                Ok(ControlFlow::Break(()))
            }
            ResolutionType::Array => {
                if value.is_mapping() {
                    return Err(Error::type_mismatch(
                        self.key,
                        format!(
                            "expected Array and got {} for key '{}'",
                            value.type_name(),
                            self.key
                        ),
                    ));
                }
                let items = match self.answer.get_or_insert_with(|| Value::Sequence(Vec::new())) {
                    Value::Sequence(items) => items,
                    _ => return Err(Error::internal("array accumulator holds a non-sequence")),
                };
                match value {
                    Value::Sequence(values) => items.extend(values),
                    scalar => items.push(scalar),
                }
                Ok(ControlFlow::Continue(()))
            }
            ResolutionType::Hash(_) => {
                let lower = match value {
                    Value::Mapping(lower) => lower,
                    other => {
                        return Err(Error::type_mismatch(
                            self.key,
                            format!(
                                "expected Hash and got {} for key '{}'",
                                other.type_name(),
                                self.key
                            ),
                        ))
                    }
                };
                let merged = match self.answer.take() {
                    Some(Value::Mapping(higher)) => merge_answer(lower, higher, self.strategy),
                    Some(_) => return Err(Error::internal("hash accumulator holds a non-mapping")),
                    None => lower,
                };
                self.answer = Some(Value::Mapping(merged));
                Ok(ControlFlow::Continue(()))
            }
        }
    }

    /// The combined answer, or `None` if nothing was accepted.
    ///
    /// Array answers are de-duplicated and have nulls removed.
    pub fn finish(self) -> Option<Value> {
        match (self.resolution, self.answer) {
            (ResolutionType::Array, Some(Value::Sequence(items))) => {
                let mut unique: Vec<Value> = Vec::with_capacity(items.len());
                for item in items.into_iter().filter(|v| !v.is_null()) {
                    if !unique.contains(&item) {
                        unique.push(item);
                    }
                }
                Some(Value::Sequence(unique))
            }
            (_, answer) => answer,
        }
    }
}
