//! Error types for hiera lookups
//!
//! Errors are structured: a kind describing what went wrong, the lookup key
//! or data file involved, and an optional actionable help message.

use std::fmt;
use std::path::PathBuf;

/// Result type alias for hiera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hiera operations
#[derive(Debug, Clone)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Lookup key being resolved when the error occurred
    pub key: Option<String>,
    /// Data or config file involved, if any
    pub file: Option<PathBuf>,
    /// Actionable help message
    pub help: Option<String>,
    /// Underlying cause (as string for Clone compatibility)
    pub cause: Option<String>,
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// Error parsing YAML/JSON
    #[error("Parse error")]
    Parse,
    /// I/O error (config file not found, unreadable data file)
    #[error("I/O error")]
    Io,
    /// Malformed dotted/quoted key
    #[error("Syntax error in key: {key}")]
    KeySyntax { key: String },
    /// A value's interpolation transitively depends on itself
    #[error("Lookup recursion detected in [{}]", chain.join(", "))]
    InterpolationLoop { chain: Vec<String> },
    /// Malformed interpolation expression
    #[error("Invalid interpolation: {message}")]
    InterpolationInvalidValue { message: String },
    /// A value had the wrong shape for the operation applied to it
    #[error("Hiera type mismatch: {message}")]
    TypeMismatch { message: String },
    /// `array`/`hash` resolution requested on a dotted key
    #[error(
        "Resolution type :{resolution} is illegal when accessing values using dotted keys. \
         Offending key was '{key}'"
    )]
    IllegalResolutionType { resolution: String, key: String },
    /// A configured backend has no registered factory
    #[error("Unknown backend: {name}")]
    UnknownBackend { name: String },
    /// A backend factory with this name already exists
    #[error("Backend '{name}' is already registered")]
    BackendAlreadyRegistered { name: String },
    /// Configuration is structurally invalid
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },
    /// Internal error (bug in hiera)
    #[error("Internal error")]
    Internal,
}

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            key: None,
            file: None,
            help: None,
            cause: None,
        }
    }

    /// Create a new parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::from_kind(ErrorKind::Parse)
        }
    }

    /// Create an I/O error for a file
    pub fn io(file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            file: Some(file.into()),
            cause: Some(message.into()),
            ..Self::from_kind(ErrorKind::Io)
        }
    }

    /// Create a key syntax error
    pub fn key_syntax(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            help: Some(
                "Separate segments with '.', and quote a whole segment to include dots in it"
                    .into(),
            ),
            ..Self::from_kind(ErrorKind::KeySyntax { key })
        }
    }

    /// Create an interpolation loop error from the guard's chain
    pub fn interpolation_loop(chain: Vec<String>) -> Self {
        Self {
            help: Some("Break the cycle by removing one of the interpolations".into()),
            ..Self::from_kind(ErrorKind::InterpolationLoop { chain })
        }
    }

    /// Create an invalid interpolation error
    pub fn invalid_interpolation(message: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::InterpolationInvalidValue {
            message: message.into(),
        })
    }

    /// Create a type mismatch error for a lookup key
    pub fn type_mismatch(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::from_kind(ErrorKind::TypeMismatch {
                message: message.into(),
            })
        }
    }

    /// Create an illegal resolution type error for a dotted key
    pub fn illegal_resolution_type(resolution: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            help: Some("Use priority resolution, or look up the top-level key".into()),
            ..Self::from_kind(ErrorKind::IllegalResolutionType {
                resolution: resolution.into(),
                key: key.into(),
            })
        }
    }

    /// Create an unknown backend error
    pub fn unknown_backend(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            help: Some(format!(
                "Register a '{}' backend factory or check the backends list for typos",
                name
            )),
            ..Self::from_kind(ErrorKind::UnknownBackend { name })
        }
    }

    /// Create a backend already registered error
    pub fn backend_already_registered(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            help: Some(format!(
                "Use register_with_force(..., true) to override the '{}' backend",
                name
            )),
            ..Self::from_kind(ErrorKind::BackendAlreadyRegistered { name })
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::InvalidConfiguration {
            message: message.into(),
        })
    }

    /// Create an internal error (bug in hiera)
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            help: Some("This is likely a bug in hiera. Please report it.".into()),
            cause: Some(message.into()),
            ..Self::from_kind(ErrorKind::Internal)
        }
    }

    /// Add lookup key context to the error
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Add file context to the error
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Add help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Whether this error is an interpolation loop
    pub fn is_interpolation_loop(&self) -> bool {
        matches!(self.kind, ErrorKind::InterpolationLoop { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let Some(key) = &self.key {
            write!(f, "\n  Key: {}", key)?;
        }

        if let Some(file) = &self.file {
            write!(f, "\n  File: {}", file.display())?;
        }

        if let Some(cause) = &self.cause {
            write!(f, "\n  {}", cause)?;
        }

        if let Some(help) = &self.help {
            write!(f, "\n  Help: {}", help)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}
