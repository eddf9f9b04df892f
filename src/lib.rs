//! Kubernetes workflow manager library.

pub mod config;
pub mod error;
pub mod http;
pub mod k8s;
pub mod lifecycle;
pub mod manager;
pub mod observability;

pub use config::ProcessConfig;
pub use error::Error;
pub use lifecycle::{launch, Orchestrator, Shutdown};
pub use manager::{Manager, Runnable};
