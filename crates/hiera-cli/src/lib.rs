//! hiera CLI library
//!
//! Exposes the CLI entry point so the `hiera` binary stays a thin wrapper.

mod cli;

pub use cli::run;
