//! hiera CLI - Command-line hierarchical lookups
//!
//! Usage:
//!   hiera ntp_server
//!   hiera -c /etc/hiera.yaml ntp_server environment=production
//!   hiera -a classes --yaml facts.yaml
//!   hiera -h users nil ::osfamily=Debian -f json

use clap::{ArgAction, Parser};
use colored::Colorize;
use hiera_core::{Config, Hiera, LoggerKind, ResolutionType, Scope, Value, DEFAULT_CONFIG_PATH};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// hiera - Hierarchical key/value lookup
#[derive(Parser, Debug)]
#[command(name = "hiera")]
#[command(author, version, about, long_about = None)]
#[command(disable_help_flag = true)]
struct Cli {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Array search: collect every match
    #[arg(short, long, conflicts_with = "hash")]
    array: bool,

    /// Hash search: merge every match
    #[arg(short = 'h', long)]
    hash: bool,

    /// Print debug output
    #[arg(short, long)]
    debug: bool,

    /// Load scope variables from a YAML file
    #[arg(long, value_name = "FILE", conflicts_with = "json")]
    yaml: Option<PathBuf>,

    /// Load scope variables from a JSON file
    #[arg(long, value_name = "FILE")]
    json: Option<PathBuf>,

    /// Output format: text, json, yaml
    #[arg(short, long, default_value = "text", value_parser = ["text", "json", "yaml"])]
    format: String,

    /// Key to look up
    key: Option<String>,

    /// Default value, followed by VAR=VALUE scope assignments
    #[arg(value_name = "DEFAULT | VAR=VALUE", allow_hyphen_values = true)]
    args: Vec<String>,
}

/// Variables given on the command line or in a facts file.
///
/// Names are top-scope, so `%{::osfamily}` and `%{osfamily}` find the same
/// variable.
#[derive(Debug, Default, PartialEq)]
struct TopScope {
    vars: IndexMap<String, Value>,
}

impl TopScope {
    fn insert(&mut self, name: &str, value: Value) {
        self.vars.insert(top_name(name).to_string(), value);
    }
}

impl Scope for TopScope {
    fn get(&self, key: &str) -> Option<Value> {
        self.vars.get(top_name(key)).cloned()
    }
}

fn top_name(name: &str) -> &str {
    name.strip_prefix("::").unwrap_or(name)
}

/// Trailing positional arguments after the key
#[derive(Debug, Default, PartialEq)]
struct Trailing {
    default: Option<String>,
    vars: Vec<(String, String)>,
    unparsed: Vec<String>,
}

fn split_trailing(args: &[String]) -> Trailing {
    let mut trailing = Trailing::default();
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                trailing.vars.push((name.to_string(), value.to_string()));
            }
            _ if trailing.default.is_none() => trailing.default = Some(arg.clone()),
            _ => trailing.unparsed.push(arg.clone()),
        }
    }
    trailing
}

/// Run the CLI with the process arguments
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let key = match cli.key.as_deref() {
        Some(key) if !key.is_empty() => key,
        _ => {
            eprintln!("{}", "Please supply a data item to look up".red());
            return ExitCode::from(1);
        }
    };

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            return ExitCode::from(2);
        }
    };
    init_logging(config.logger, cli.debug);

    let hiera = match Hiera::from_config(config) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            return ExitCode::from(2);
        }
    };

    let trailing = split_trailing(&cli.args);
    for arg in &trailing.unparsed {
        eprintln!("Don't know how to parse scope argument: {}", arg);
    }

    let scope = match load_scope(cli.yaml.as_deref(), cli.json.as_deref(), &trailing.vars) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(1);
        }
    };

    let default = trailing.default.map(Value::String).unwrap_or_default();
    let resolution = resolution_type(cli.array, cli.hash);

    match hiera.lookup(key, default, &scope, None, resolution) {
        Ok(value) => match format_value(&value, &cli.format) {
            Ok(out) => {
                println!("{}", out);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                ExitCode::from(1)
            }
        },
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            ExitCode::from(1)
        }
    }
}

fn init_logging(logger: LoggerKind, debug: bool) {
    if logger == LoggerKind::Noop {
        return;
    }
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .format_target(false)
        .try_init();
}

fn resolution_type(array: bool, hash: bool) -> ResolutionType {
    if array {
        ResolutionType::Array
    } else if hash {
        ResolutionType::Hash(None)
    } else {
        ResolutionType::Priority
    }
}

/// Build the scope from an optional facts file, then `VAR=VALUE` pairs
fn load_scope(
    yaml: Option<&Path>,
    json: Option<&Path>,
    vars: &[(String, String)],
) -> Result<TopScope, String> {
    let mut scope = TopScope::default();

    let facts = match (yaml, json) {
        (Some(path), _) => Some(read_facts(path, "YAML", |s| {
            serde_yaml::from_str(s).map_err(|e| e.to_string())
        })?),
        (None, Some(path)) => Some(read_facts(path, "JSON", |s| {
            serde_json::from_str(s).map_err(|e| e.to_string())
        })?),
        (None, None) => None,
    };
    if let Some(facts) = facts {
        for (name, value) in facts {
            scope.insert(&name, value);
        }
    }

    for (name, value) in vars {
        scope.insert(name, Value::from(value.as_str()));
    }
    Ok(scope)
}

fn read_facts(
    path: &Path,
    format: &str,
    parse: impl Fn(&str) -> Result<Value, String>,
) -> Result<IndexMap<String, Value>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Could not load {} scope: {}: {}", format, path.display(), e))?;
    match parse(&content) {
        Ok(Value::Mapping(map)) => Ok(map),
        Ok(Value::Null) => Ok(IndexMap::new()),
        Ok(other) => Err(format!(
            "Could not load {} scope: {} holds {}, not a Hash",
            format,
            path.display(),
            other.type_name()
        )),
        Err(e) => Err(format!(
            "Could not load {} scope: {}: {}",
            format,
            path.display(),
            e
        )),
    }
}

fn format_value(value: &Value, format: &str) -> Result<String, String> {
    match format {
        "json" => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
        "yaml" => serde_yaml::to_string(value)
            .map(|s| s.trim_end().to_string())
            .map_err(|e| e.to_string()),
        _ => match value {
            Value::Sequence(_) | Value::Mapping(_) => serde_yaml::to_string(value)
                .map(|s| s.trim_end().to_string())
                .map_err(|e| e.to_string()),
            // Strings raw, nil for nothing found
            other => Ok(other.to_string()),
        },
    }
}
