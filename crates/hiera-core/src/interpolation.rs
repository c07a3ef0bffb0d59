//! Interpolation of `%{...}` tokens
//!
//! Supported token forms:
//! - `%{name}` - scope variable, may be a dotted key (`%{trusted.certname}`)
//! - `%{scope('name')}` - same as a bare variable
//! - `%{hiera('key')}` - nested priority lookup
//! - `%{alias('key')}` - nested lookup that keeps the value's type; the
//!   string must consist of this token only
//! - `%{literal('text')}` - `text` verbatim, never interpolated further
//! - `%{}`, `%{::}`, `%{''}`, `%{""}`, `%{'::'}`, `%{"::"}` - empty string
//!
//! A token ends at the first `}`. A `%{` with no closing brace is plain text.

use crate::engine::LookupContext;
use crate::error::{Error, Result};
use crate::key::split_key;
use crate::merge::ResolutionType;
use crate::scope::{lookup_variable, Scope};
use crate::value::Value;

/// A piece of a template string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part<'a> {
    /// Text copied to the output unchanged
    Text(&'a str),
    /// The contents of a `%{...}` token, without the delimiters
    Token(&'a str),
}

/// Interpolation method named in a `%{method('arg')}` token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Scope,
    Hiera,
    Literal,
    Alias,
}

impl Method {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "scope" => Some(Method::Scope),
            "hiera" => Some(Method::Hiera),
            "literal" => Some(Method::Literal),
            "alias" => Some(Method::Alias),
            _ => None,
        }
    }
}

/// A classified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression<'a> {
    /// One of the empty patterns; renders as the empty string
    Empty,
    /// A scope variable, exactly as written between the braces
    Variable(&'a str),
    /// A method call with its unquoted argument
    Method { method: Method, argument: &'a str },
}

impl<'a> Expression<'a> {
    /// Classify the contents of a token
    pub fn parse(token: &'a str) -> Result<Self> {
        if matches!(token.trim(), "" | "::" | "\"\"" | "''" | "\"::\"" | "'::'") {
            return Ok(Expression::Empty);
        }

        let Some((name, rest)) = split_call(token) else {
            return Ok(Expression::Variable(token));
        };

        let method = Method::from_name(name).ok_or_else(|| {
            Error::invalid_interpolation(format!(
                "Unsupported interpolation method '{}' in '%{{{}}}'",
                name, token
            ))
            .with_help("Use one of scope(), hiera(), alias() or literal()")
        })?;

        let argument = unquote(rest).ok_or_else(|| {
            Error::invalid_interpolation(format!(
                "Argument to {}() must be a single or double quoted string in '%{{{}}}'",
                name, token
            ))
        })?;

        Ok(Expression::Method { method, argument })
    }
}

/// Split `name(args)` into `name` and `args`
fn split_call(token: &str) -> Option<(&str, &str)> {
    let open = token.find('(')?;
    let inner = token[open + 1..].strip_suffix(')')?;
    let name = &token[..open];
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    Some((name, inner))
}

fn unquote(arg: &str) -> Option<&str> {
    let quote = arg.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = arg[1..].strip_suffix(quote)?;
    if inner.is_empty() || inner.contains(['\'', '"']) {
        return None;
    }
    Some(inner)
}

/// Parser splitting a string into text and tokens
pub struct TemplateParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> TemplateParser<'a> {
    /// Create a new parser for the given input
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Parse the entire input
    pub fn parse(mut self) -> Vec<Part<'a>> {
        let mut parts = Vec::new();

        while !self.is_eof() {
            let start = self.pos;
            match self.find_token() {
                Some((token_start, token_end)) => {
                    if token_start > start {
                        parts.push(Part::Text(&self.input[start..token_start]));
                    }
                    parts.push(Part::Token(&self.input[token_start + 2..token_end]));
                    self.pos = token_end + 1;
                }
                None => {
                    parts.push(Part::Text(&self.input[start..]));
                    self.pos = self.input.len();
                }
            }
        }

        parts
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Byte offsets of the next `%{` and its closing `}`
    fn find_token(&self) -> Option<(usize, usize)> {
        let rest = &self.input[self.pos..];
        let open = rest.find("%{")?;
        let close = rest[open + 2..].find('}')?;
        Some((self.pos + open, self.pos + open + 2 + close))
    }
}

/// Split a string into text and tokens
pub fn parse(input: &str) -> Vec<Part<'_>> {
    TemplateParser::new(input).parse()
}

/// Check if a string contains at least one complete `%{...}` token
pub fn contains_interpolation(input: &str) -> bool {
    input
        .find("%{")
        .is_some_and(|open| input[open + 2..].contains('}'))
}

/// Interpolate every token in `text`.
///
/// The result is a string, except when `text` is exactly one `alias` token,
/// in which case the aliased value is returned with its own type.
pub fn interpolate_str(
    text: &str,
    scope: &dyn Scope,
    extra: &dyn Scope,
    ctx: &mut LookupContext<'_>,
) -> Result<Value> {
    let parts = parse(text);
    let whole_token = matches!(parts.as_slice(), [Part::Token(_)]);
    let mut output = String::with_capacity(text.len());

    for part in parts {
        let token = match part {
            Part::Text(s) => {
                output.push_str(s);
                continue;
            }
            Part::Token(token) => token,
        };

        let expression = Expression::parse(token)?;
        let is_alias = matches!(
            expression,
            Expression::Method {
                method: Method::Alias,
                ..
            }
        );
        if is_alias && !whole_token {
            return Err(Error::invalid_interpolation(format!(
                "Cannot call alias in the string context: '{}'",
                text
            ))
            .with_help("alias() must be the only content of the string"));
        }

        let value = resolve(token, &expression, scope, extra, ctx)?;
        if is_alias {
            return Ok(value);
        }
        output.push_str(&value.to_interpolated_string());
    }

    Ok(Value::String(output))
}

fn resolve(
    token: &str,
    expression: &Expression<'_>,
    scope: &dyn Scope,
    extra: &dyn Scope,
    ctx: &mut LookupContext<'_>,
) -> Result<Value> {
    if *expression == Expression::Empty {
        return Ok(Value::String(String::new()));
    }

    ctx.check(token, |ctx| {
        let value = match *expression {
            Expression::Empty => Value::String(String::new()),
            Expression::Variable(key)
            | Expression::Method {
                method: Method::Scope,
                argument: key,
            } => scope_value(key, scope, extra)?,
            Expression::Method {
                method: Method::Hiera | Method::Alias,
                argument: key,
            } => {
                let engine = ctx.engine();
                engine.lookup_in_context(
                    key,
                    Value::Null,
                    scope,
                    None,
                    &ResolutionType::Priority,
                    ctx,
                )?
            }
            Expression::Method {
                method: Method::Literal,
                argument,
            } => return Ok(Value::from(argument)),
        };

        match value {
            Value::String(s) if contains_interpolation(&s) => interpolate_str(&s, scope, extra, ctx),
            other => Ok(other),
        }
    })
}

/// Resolve a (possibly dotted) variable from scope, falling back to `extra`
fn scope_value(key: &str, scope: &dyn Scope, extra: &dyn Scope) -> Result<Value> {
    let segments = split_key(key)?;
    let Some((root, rest)) = segments.split_first() else {
        return Ok(Value::Null);
    };
    if let Some(value) = lookup_variable(scope, extra, root) {
        if let Some(found) = value.qualified_lookup(rest, key)? {
            return Ok(found.clone());
        }
    }
    // A path missing under the scope's root is retried against extra data
    let Some(value) = extra.get(root) else {
        return Ok(Value::Null);
    };
    Ok(value.qualified_lookup(rest, key)?.cloned().unwrap_or_default())
}

/// Interpolate every string inside an answer.
///
/// Sequences and mappings are walked recursively; mapping keys are
/// interpolated too. Other values are returned unchanged.
pub fn parse_answer(
    value: &Value,
    scope: &dyn Scope,
    extra: &dyn Scope,
    ctx: &mut LookupContext<'_>,
) -> Result<Value> {
    match value {
        Value::String(s) => interpolate_str(s, scope, extra, ctx),
        Value::Sequence(items) => {
            let mut parsed = Vec::with_capacity(items.len());
            for item in items {
                parsed.push(parse_answer(item, scope, extra, ctx)?);
            }
            Ok(Value::Sequence(parsed))
        }
        Value::Mapping(map) => {
            let mut parsed = indexmap::IndexMap::with_capacity(map.len());
            for (key, item) in map {
                let key = interpolate_str(key, scope, extra, ctx)?.to_interpolated_string();
                parsed.insert(key, parse_answer(item, scope, extra, ctx)?);
            }
            Ok(Value::Mapping(parsed))
        }
        other => Ok(other.clone()),
    }
}
