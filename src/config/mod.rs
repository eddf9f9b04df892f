//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! argv + environment
//!     → cli.rs (clap parse, syntactic checks)
//!     → loader.rs (optional TOML file, flag > env > file > default)
//!     → validation.rs (semantic checks)
//!     → ProcessConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - All fields have defaults so the process runs with no flags at all
//! - Validation separates syntactic (clap/serde) from semantic checks

pub mod cli;
pub mod loader;
pub mod schema;
pub mod validation;

use std::path::PathBuf;

use thiserror::Error;

pub use cli::Cli;
pub use loader::resolve;
pub use schema::{BindAddress, LeaderElectionConfig, LogFormat, LoggingConfig, ProcessConfig};
pub use validation::ValidationError;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {flag}: {reason}")]
    InvalidAddress {
        flag: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid log filter {directive:?}: {reason}")]
    LogFilter { directive: String, reason: String },

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
