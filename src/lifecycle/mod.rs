//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Flags → Config → Logging → Cluster connection → Manager
//!         → Bootstrap client → Launch router → Probe checks → Start manager
//!
//! Shutdown (shutdown.rs):
//!     Token cancelled → Manager drains runnables, releases lease
//!         → Router stops accepting → Both joined → Exit code
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     Second SIGTERM/SIGINT → Exit 1 immediately
//! ```
//!
//! # Design Decisions
//! - Ordered startup: nothing listens until the cluster is known to be usable
//! - One shutdown token for the whole process
//! - Shutdown has a timeout: runnables get the graceful shutdown budget

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{exit_status, launch, Orchestrator};
