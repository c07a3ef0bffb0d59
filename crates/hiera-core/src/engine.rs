//! Lookup engine
//!
//! The engine owns the configuration and one instance of every configured
//! backend. A lookup asks each backend in turn and combines the answers
//! according to the resolution type.

use crate::backend::{Backend, BackendRegistry, Outcome};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::guard::RecursionGuard;
use crate::interpolation::interpolate_str;
use crate::key::split_key;
use crate::merge::{Accumulator, MergeStrategy, ResolutionType};
use crate::scope::{EmptyScope, OverlayScope, Scope};
use crate::value::Value;

/// State shared by one top-level lookup and every lookup nested inside it
/// through interpolation.
#[derive(Debug)]
pub struct LookupContext<'a> {
    engine: &'a Engine,
    order_override: Option<String>,
    guard: RecursionGuard,
}

impl<'a> LookupContext<'a> {
    /// Create a context for a new top-level lookup
    pub fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            order_override: None,
            guard: RecursionGuard::new(),
        }
    }

    /// Set the order override nested lookups inherit
    pub fn with_order_override(mut self, order_override: impl Into<String>) -> Self {
        self.order_override = Some(order_override.into());
        self
    }

    /// The engine performing the lookup
    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    /// The order override nested lookups inherit
    pub fn order_override(&self) -> Option<&str> {
        self.order_override.as_deref()
    }

    /// Interpolation sites currently being resolved
    pub fn guard(&self) -> &RecursionGuard {
        &self.guard
    }

    /// Run `f` with interpolation site `name` marked as in progress
    pub fn check<T, F>(&mut self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.guard.enter(name)?;
        let result = f(self);
        self.guard.leave();
        result
    }
}

/// Configuration plus instantiated backends
#[derive(Debug)]
pub struct Engine {
    config: Config,
    strategy: MergeStrategy,
    backends: Vec<Box<dyn Backend>>,
}

impl Engine {
    /// Create an engine, instantiating every configured backend from
    /// `registry`. Fails on the first backend name with no factory.
    pub fn new(config: Config, registry: &BackendRegistry) -> Result<Self> {
        let backends = config
            .backends
            .iter()
            .map(|name| registry.instantiate(name, &config))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::with_backends(config, backends))
    }

    /// Create an engine from already instantiated backends
    pub fn with_backends(config: Config, backends: Vec<Box<dyn Backend>>) -> Self {
        Self {
            strategy: config.merge_strategy(),
            config,
            backends,
        }
    }

    /// The configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The backends, in lookup order
    pub fn backends(&self) -> &[Box<dyn Backend>] {
        &self.backends
    }

    /// Strategy used by `hash` lookups that do not carry their own
    pub fn merge_strategy(&self) -> &MergeStrategy {
        &self.strategy
    }

    /// Look up `key` as a new top-level lookup
    pub fn lookup(
        &self,
        key: &str,
        default: Value,
        scope: &dyn Scope,
        order_override: Option<&str>,
        resolution: &ResolutionType,
    ) -> Result<Value> {
        let mut ctx = LookupContext::new(self);
        self.lookup_in_context(key, default, scope, order_override, resolution, &mut ctx)
    }

    /// Look up `key` as part of the lookup `ctx` belongs to.
    ///
    /// Without an explicit `order_override` the context's one is used; a
    /// context without one adopts the explicit value.
    ///
    /// Returns the combined answer, or `default` if no backend had the key.
    /// A string default is interpolated first.
    pub fn lookup_in_context(
        &self,
        key: &str,
        default: Value,
        scope: &dyn Scope,
        order_override: Option<&str>,
        resolution: &ResolutionType,
        ctx: &mut LookupContext<'_>,
    ) -> Result<Value> {
        let order_override = order_override
            .map(str::to_string)
            .or_else(|| ctx.order_override.clone());
        if ctx.order_override.is_none() {
            ctx.order_override = order_override.clone();
        }

        let segments = split_key(key)?;
        if segments.len() > 1 && !matches!(resolution, ResolutionType::Priority) {
            return Err(Error::illegal_resolution_type(resolution.name(), key));
        }

        let mut answer = Accumulator::new(key, resolution, &self.strategy);
        for backend in &self.backends {
            let outcome = backend
                .lookup_with_segments(
                    &segments,
                    key,
                    scope,
                    order_override.as_deref(),
                    resolution,
                    ctx,
                )
                .map_err(|e| match e.key {
                    Some(_) => e,
                    None => e.with_key(key),
                })?;

            let Outcome::Found(value) = outcome else {
                continue;
            };
            if answer.push(value)?.is_break() {
                break;
            }
        }

        match answer.finish() {
            Some(value) => Ok(value),
            None => match default {
                Value::String(s) => interpolate_str(&s, scope, &EmptyScope, ctx),
                other => Ok(other),
            },
        }
    }

    /// Data source names for a lookup, highest priority first.
    ///
    /// The order override comes first, followed by `hierarchy` (or the
    /// configured hierarchy, or `common` when that is empty). Each name is
    /// interpolated; names that end up empty or would escape the data
    /// directory are skipped.
    pub fn datasources(
        &self,
        scope: &dyn Scope,
        order_override: Option<&str>,
        hierarchy: Option<&[String]>,
        ctx: &mut LookupContext<'_>,
    ) -> Result<Vec<String>> {
        let templates = self.templates(order_override, hierarchy);

        let mut sources = Vec::with_capacity(templates.len());
        for template in templates {
            let source = interpolate_str(template, scope, &EmptyScope, ctx)?.to_interpolated_string();
            if is_valid_source(template, &source) {
                sources.push(source);
            }
        }
        Ok(sources)
    }

    /// Like [`datasources`](Self::datasources), but every template is
    /// expanded once per element of the list variable `property`.
    ///
    /// Consecutive duplicates produced by one template are dropped. When
    /// `property` is unset or null this is the same as `datasources`; a
    /// scalar counts as a one-element list.
    pub fn dynamic_datasources(
        &self,
        scope: &dyn Scope,
        order_override: Option<&str>,
        hierarchy: Option<&[String]>,
        property: &str,
        ctx: &mut LookupContext<'_>,
    ) -> Result<Vec<String>> {
        let elements = match scope.get(property) {
            None | Some(Value::Null) => {
                return self.datasources(scope, order_override, hierarchy, ctx)
            }
            Some(Value::Sequence(items)) => items,
            Some(other) => vec![other],
        };

        let mut sources = Vec::new();
        for template in self.templates(order_override, hierarchy) {
            let mut last: Option<String> = None;
            for element in &elements {
                let scope = OverlayScope::new(scope, property, element);
                let source =
                    interpolate_str(template, &scope, &EmptyScope, ctx)?.to_interpolated_string();
                if last.as_deref() != Some(source.as_str()) && is_valid_source(template, &source) {
                    sources.push(source.clone());
                }
                last = Some(source);
            }
        }
        Ok(sources)
    }

    fn templates<'s>(
        &'s self,
        order_override: Option<&'s str>,
        hierarchy: Option<&'s [String]>,
    ) -> Vec<&'s str> {
        let hierarchy = hierarchy.unwrap_or(&self.config.hierarchy);

        let mut templates: Vec<&str> = Vec::with_capacity(hierarchy.len() + 1);
        templates.extend(order_override);
        if hierarchy.is_empty() {
            templates.push("common");
        } else {
            templates.extend(hierarchy.iter().map(String::as_str));
        }
        templates
    }
}

fn is_valid_source(template: &str, source: &str) -> bool {
    if source.is_empty() || source.starts_with('/') || source.ends_with('/') || source.contains("//")
    {
        log::debug!("Ignoring bad definition in hierarchy: {}", template);
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FnBackend;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn memory(name: &str, data: &str) -> Box<dyn Backend> {
        let data = yaml(data);
        Box::new(FnBackend::new(name, move |key, _scope| {
            Ok(data.as_mapping().and_then(|m| m.get(key)).cloned().into())
        }))
    }

    fn counting(name: &str, data: &str, calls: Arc<AtomicUsize>) -> Box<dyn Backend> {
        let data = yaml(data);
        Box::new(FnBackend::new(name, move |key, _scope| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(data.as_mapping().and_then(|m| m.get(key)).cloned().into())
        }))
    }

    fn engine(backends: Vec<Box<dyn Backend>>) -> Engine {
        Engine::with_backends(Config::default(), backends)
    }

    #[test]
    fn test_priority_short_circuits() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let engine = engine(vec![
            counting("b1", "{k: from_b1}", Arc::clone(&first)),
            counting("b2", "{k: from_b2}", Arc::clone(&second)),
        ]);

        let value = engine
            .lookup("k", Value::Null, &EmptyScope, None, &ResolutionType::Priority)
            .unwrap();

        assert_eq!(value, Value::from("from_b1"));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_priority_falls_through_not_found() {
        let engine = engine(vec![memory("b1", "{}"), memory("b2", "{k: from_b2}")]);

        let value = engine
            .lookup("k", Value::Null, &EmptyScope, None, &ResolutionType::Priority)
            .unwrap();
        assert_eq!(value, Value::from("from_b2"));
    }

    #[test]
    fn test_array_merge_flattens_and_dedupes() {
        let engine = engine(vec![
            memory("b1", "{k: [a]}"),
            memory("b2", "{k: b}"),
            memory("b3", "{k: [a, c]}"),
        ]);

        let value = engine
            .lookup("k", Value::Null, &EmptyScope, None, &ResolutionType::Array)
            .unwrap();
        assert_eq!(value, yaml("[a, b, c]"));
    }

    #[test]
    fn test_array_merge_rejects_mapping() {
        let engine = engine(vec![memory("b1", "{k: {a: 1}}")]);

        let err = engine
            .lookup("k", Value::Null, &EmptyScope, None, &ResolutionType::Array)
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
        assert!(err.to_string().contains("'k'"));
    }

    #[test]
    fn test_hash_native_merge_precedence() {
        let engine = engine(vec![memory("b1", "{k: {a: 1}}"), memory("b2", "{k: {a: 2, b: 3}}")]);

        let value = engine
            .lookup("k", Value::Null, &EmptyScope, None, &ResolutionType::Hash(None))
            .unwrap();
        assert_eq!(value, yaml("{a: 1, b: 3}"));
    }

    #[test]
    fn test_hash_merge_uses_configured_behavior() {
        let config = Config::from_yaml("merge_behavior: deeper\n").unwrap();
        let engine = Engine::with_backends(
            config,
            vec![
                memory("b1", "{k: {db: {host: high}}}"),
                memory("b2", "{k: {db: {host: low, port: 5432}}}"),
            ],
        );

        let value = engine
            .lookup("k", Value::Null, &EmptyScope, None, &ResolutionType::Hash(None))
            .unwrap();
        assert_eq!(value, yaml("{db: {host: high, port: 5432}}"));
    }

    #[test]
    fn test_hash_merge_rejects_non_mapping() {
        let engine = engine(vec![memory("b1", "{k: [a]}")]);

        let err = engine
            .lookup("k", Value::Null, &EmptyScope, None, &ResolutionType::Hash(None))
            .unwrap_err();
        assert!(err.to_string().contains("expected Hash and got sequence"));
    }

    #[test]
    fn test_qualified_key_navigation() {
        let engine = engine(vec![memory("b1", "{key: {a: {b: v}}}")]);

        let found = engine
            .lookup("key.a.b", Value::Null, &EmptyScope, None, &ResolutionType::Priority)
            .unwrap();
        assert_eq!(found, Value::from("v"));

        let missing = engine
            .lookup(
                "key.a.c",
                Value::from("fallback"),
                &EmptyScope,
                None,
                &ResolutionType::Priority,
            )
            .unwrap();
        assert_eq!(missing, Value::from("fallback"));
    }

    #[test]
    fn test_qualified_key_falls_through_to_next_backend() {
        let engine = engine(vec![
            memory("b1", "{key: {a: {}}}"),
            memory("b2", "{key: {a: {c: second}}}"),
        ]);

        let value = engine
            .lookup("key.a.c", Value::Null, &EmptyScope, None, &ResolutionType::Priority)
            .unwrap();
        assert_eq!(value, Value::from("second"));
    }

    #[test]
    fn test_qualified_key_index() {
        let engine = engine(vec![memory("b1", "{ntp_servers: [a.example, b.example]}")]);

        let value = engine
            .lookup("ntp_servers.1", Value::Null, &EmptyScope, None, &ResolutionType::Priority)
            .unwrap();
        assert_eq!(value, Value::from("b.example"));
    }

    #[test]
    fn test_qualified_key_type_mismatch() {
        let engine = engine(vec![memory("b1", "{key: {a: v}}")]);

        let err = engine
            .lookup("key.0", Value::Null, &EmptyScope, None, &ResolutionType::Priority)
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
        assert!(err.to_string().contains("'0' from key 'key.0'"));
    }

    #[test]
    fn test_dotted_key_rejects_hash_resolution() {
        let engine = engine(vec![memory("b1", "{key: {sub: {a: 1}}}")]);

        let err = engine
            .lookup("key.sub", Value::Null, &EmptyScope, None, &ResolutionType::Hash(None))
            .unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::IllegalResolutionType {
                resolution: "hash".into(),
                key: "key.sub".into()
            }
        );
        assert!(err.to_string().contains("Resolution type :hash is illegal"));
    }

    #[test]
    fn test_quoted_key_is_single_segment() {
        let engine = engine(vec![memory("b1", "{a.b: dotted}")]);

        // One segment, so hash resolution is legal and the merge rejects the string
        let err = engine
            .lookup("'a.b'", Value::Null, &EmptyScope, None, &ResolutionType::Hash(None))
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));

        let value = engine
            .lookup("'a.b'", Value::Null, &EmptyScope, None, &ResolutionType::Priority)
            .unwrap();
        assert_eq!(value, Value::from("dotted"));
    }

    #[test]
    fn test_key_syntax_error() {
        let engine = engine(vec![memory("b1", "{}")]);

        let err = engine
            .lookup("a..b", Value::Null, &EmptyScope, None, &ResolutionType::Priority)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeySyntax { key: "a..b".into() });
    }

    #[test]
    fn test_explicit_null_is_not_default() {
        let engine = engine(vec![memory("b1", "{k: ~}"), memory("b2", "{k: later}")]);

        let value = engine
            .lookup("k", Value::from("default"), &EmptyScope, None, &ResolutionType::Priority)
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_absent_key_returns_interpolated_default() {
        let engine = engine(vec![memory("b1", "{}")]);
        let scope = yaml("{name: box1}");

        let value = engine
            .lookup(
                "k",
                Value::from("%{name}-default"),
                &scope,
                None,
                &ResolutionType::Priority,
            )
            .unwrap();
        assert_eq!(value, Value::from("box1-default"));

        let value = engine
            .lookup("k", yaml("[x, y]"), &scope, None, &ResolutionType::Array)
            .unwrap();
        assert_eq!(value, yaml("[x, y]"));
    }

    #[test]
    fn test_empty_collection_is_found() {
        let engine = engine(vec![memory("b1", "{k: []}"), memory("b2", "{k: [x]}")]);

        let value = engine
            .lookup("k", Value::from("default"), &EmptyScope, None, &ResolutionType::Priority)
            .unwrap();
        assert_eq!(value, yaml("[]"));
    }

    #[test]
    fn test_new_fails_on_unknown_backend() {
        let config = Config::from_yaml("backends: [yaml, redis]\n").unwrap();
        let err = Engine::new(config, &BackendRegistry::with_builtins()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownBackend { name: "redis".into() });
    }

    #[test]
    fn test_datasources() {
        let config =
            Config::from_yaml("hierarchy: ['nodes/%{name}', '%{missing}', 'os/%{os}/', common]\n")
                .unwrap();
        let engine = Engine::with_backends(config, Vec::new());
        let mut ctx = LookupContext::new(&engine);
        let scope = yaml("{name: box1}");

        let sources = engine
            .datasources(&scope, Some("override"), None, &mut ctx)
            .unwrap();
        assert_eq!(sources, vec!["override", "nodes/box1", "common"]);
    }

    #[test]
    fn test_datasources_skip_escaping_names() {
        let config = Config::from_yaml("hierarchy: ['/etc/passwd', 'a//b', 'a/', '%{x}/b', ok]\n").unwrap();
        let engine = Engine::with_backends(config, Vec::new());
        let mut ctx = LookupContext::new(&engine);

        let sources = engine.datasources(&EmptyScope, None, None, &mut ctx).unwrap();
        assert_eq!(sources, vec!["ok"]);
    }

    #[test]
    fn test_datasources_hierarchy_argument_and_empty_fallback() {
        let config = Config::from_yaml("hierarchy: []\n").unwrap();
        let engine = Engine::with_backends(config, Vec::new());
        let mut ctx = LookupContext::new(&engine);

        assert_eq!(
            engine.datasources(&EmptyScope, None, None, &mut ctx).unwrap(),
            vec!["common"]
        );

        let custom = vec!["one".to_string(), "two".to_string()];
        assert_eq!(
            engine
                .datasources(&EmptyScope, None, Some(custom.as_slice()), &mut ctx)
                .unwrap(),
            vec!["one", "two"]
        );
    }

    #[test]
    fn test_dynamic_datasources_expand_list_variable() {
        let config =
            Config::from_yaml("hierarchy: ['roles/%{role}', 'env/%{env}', common]\n").unwrap();
        let engine = Engine::with_backends(config, Vec::new());
        let mut ctx = LookupContext::new(&engine);
        let scope = yaml("{role: [web, db], env: prod}");

        let sources = engine
            .dynamic_datasources(&scope, Some("%{role}-first"), None, "role", &mut ctx)
            .unwrap();
        assert_eq!(
            sources,
            vec!["web-first", "db-first", "roles/web", "roles/db", "env/prod", "common"]
        );
    }

    #[test]
    fn test_dynamic_datasources_skip_bad_names() {
        let config = Config::from_yaml("hierarchy: ['roles/%{role}', common]\n").unwrap();
        let engine = Engine::with_backends(config, Vec::new());
        let mut ctx = LookupContext::new(&engine);
        let scope = yaml("{role: [web, '', web, db]}");

        let sources = engine
            .dynamic_datasources(&scope, None, None, "role", &mut ctx)
            .unwrap();
        assert_eq!(sources, vec!["roles/web", "roles/web", "roles/db", "common"]);
    }

    #[test]
    fn test_dynamic_datasources_without_list_variable() {
        let config = Config::from_yaml("hierarchy: ['roles/%{role}', common]\n").unwrap();
        let engine = Engine::with_backends(config, Vec::new());
        let mut ctx = LookupContext::new(&engine);

        assert_eq!(
            engine
                .dynamic_datasources(&EmptyScope, None, None, "role", &mut ctx)
                .unwrap(),
            engine.datasources(&EmptyScope, None, None, &mut ctx).unwrap()
        );
        assert_eq!(
            engine
                .dynamic_datasources(&yaml("{role: web}"), None, None, "role", &mut ctx)
                .unwrap(),
            vec!["roles/web", "common"]
        );
    }

    #[test]
    fn test_context_adopts_order_override() {
        let engine = engine(Vec::new());
        let mut ctx = LookupContext::new(&engine);

        engine
            .lookup_in_context(
                "k",
                Value::Null,
                &EmptyScope,
                Some("special"),
                &ResolutionType::Priority,
                &mut ctx,
            )
            .unwrap();
        assert_eq!(ctx.order_override(), Some("special"));

        let mut ctx = LookupContext::new(&engine).with_order_override("first");
        engine
            .lookup_in_context(
                "k",
                Value::Null,
                &EmptyScope,
                Some("second"),
                &ResolutionType::Priority,
                &mut ctx,
            )
            .unwrap();
        assert_eq!(ctx.order_override(), Some("first"));
    }

    fn write(dir: &std::path::Path, name: &str, content: &str) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn yaml_engine(dir: &std::path::Path, hierarchy: &str) -> Engine {
        let config = Config::from_yaml(&format!(
            "backends: [yaml]\nhierarchy: {}\nyaml:\n  datadir: '{}'\n",
            hierarchy,
            dir.display()
        ))
        .unwrap();
        Engine::new(config, &BackendRegistry::with_builtins()).unwrap()
    }

    #[test]
    fn test_end_to_end_yaml_lookup() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "common.yaml", "http_port: 8080\n");

        let engine = yaml_engine(dir.path(), "['nodes/%{name}', common]");
        let scope = yaml("{name: box1}");

        let value = engine
            .lookup("http_port", Value::Null, &scope, None, &ResolutionType::Priority)
            .unwrap();
        assert_eq!(value, Value::Integer(8080));
    }

    #[test]
    fn test_nested_lookup_inherits_order_override() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "special.yaml", "x: from_special\n");
        write(dir.path(), "common.yaml", "x: from_common\ny: \"%{hiera('x')}\"\n");

        let engine = yaml_engine(dir.path(), "[common]");

        let value = engine
            .lookup("y", Value::Null, &EmptyScope, Some("special"), &ResolutionType::Priority)
            .unwrap();
        assert_eq!(value, Value::from("from_special"));

        let value = engine
            .lookup("y", Value::Null, &EmptyScope, None, &ResolutionType::Priority)
            .unwrap();
        assert_eq!(value, Value::from("from_common"));
    }

    #[test]
    fn test_alias_returns_structured_value() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "common.yaml",
            "servers: [a, b]\nntp_servers: \"%{alias('servers')}\"\n",
        );

        let engine = yaml_engine(dir.path(), "[common]");

        let value = engine
            .lookup("ntp_servers", Value::Null, &EmptyScope, None, &ResolutionType::Priority)
            .unwrap();
        assert_eq!(value, yaml("[a, b]"));
    }

    #[test]
    fn test_lookup_loop_through_data_files() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "common.yaml",
            "foo: \"%{hiera('bar')}\"\nbar: \"%{hiera('foo')}\"\n",
        );

        let engine = yaml_engine(dir.path(), "[common]");

        let err = engine
            .lookup("foo", Value::Null, &EmptyScope, None, &ResolutionType::Priority)
            .unwrap_err();
        assert!(err.is_interpolation_loop());
    }
}
