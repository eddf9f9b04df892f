//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured events inside named-logger spans)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → /metrics on the manager's metrics address (Prometheus scrape)
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{Logger, LoggerBindings};
