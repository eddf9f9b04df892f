//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber once per process
//! - Provide named loggers that components receive at construction
//!
//! # Design Decisions
//! - A named logger is a `tracing` span carrying a `logger` field; tasks are
//!   instrumented with it so every event inside inherits the name
//! - Names nest with `.` (`run.router`), mirroring how they are derived
//! - Loggers are built after the subscriber is installed; spans created
//!   earlier would be permanently disabled

use std::sync::Arc;

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{ConfigError, LogFormat, LoggingConfig};

/// Install the global subscriber.
///
/// A second call keeps the subscriber that is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|e| ConfigError::LogFilter {
        directive: config.level.clone(),
        reason: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

/// A named logger.
#[derive(Debug, Clone)]
pub struct Logger {
    name: Arc<str>,
    span: Span,
}

impl Logger {
    /// Create a top-level logger.
    pub fn named(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            span: tracing::info_span!("component", logger = %name),
        }
    }

    /// Derive a child logger; its name is `parent.child`.
    pub fn with_name(&self, child: &str) -> Self {
        let name = format!("{}.{}", self.name, child);
        Self {
            span: tracing::info_span!(parent: &self.span, "component", logger = %name),
            name: Arc::from(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The span to instrument futures with or to parent events on.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// The named loggers handed to each component.
#[derive(Debug, Clone)]
pub struct LoggerBindings {
    /// Startup sequencing and fatal errors.
    pub setup: Logger,
    /// Parent of the request-serving loggers.
    pub run: Logger,
    /// Workflow API handlers.
    pub handler: Logger,
    /// Workflow API server.
    pub router: Logger,
    /// Reconciliation manager.
    pub manager: Logger,
}

impl LoggerBindings {
    pub fn new() -> Self {
        let run = Logger::named("run");
        Self {
            setup: Logger::named("setup"),
            handler: run.with_name("handler"),
            router: run.with_name("router"),
            manager: Logger::named("manager"),
            run,
        }
    }
}

impl Default for LoggerBindings {
    fn default() -> Self {
        Self::new()
    }
}
