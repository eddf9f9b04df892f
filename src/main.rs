//! Kubernetes workflow manager.
//!
//! Runs a reconciliation manager and a workflow HTTP API side by side in one
//! process, against one namespace of one cluster.
//!
//! # Architecture Overview
//!
//! ```text
//!   flags / env / TOML
//!          │
//!          ▼
//!     ┌─────────┐     ┌──────────────┐     ┌──────────────────────────────┐
//!     │ config  │────▶│  lifecycle   │────▶│            k8s               │
//!     │         │     │ orchestrator │     │ connection, scheme, client,  │
//!     └─────────┘     └──────┬───────┘     │ workflow cache, lease        │
//!                            │             └──────────────┬───────────────┘
//!              ┌─────────────┴──────────────┐             │
//!              ▼                            ▼             │
//!     ┌──────────────────┐        ┌──────────────────┐    │
//!     │     manager      │        │       http       │◀───┘
//!     │ leader election  │        │ /api/v1/...      │
//!     │ runnables        │        │ (--listen)       │
//!     │ /healthz /readyz │        └──────────────────┘
//!     │ /metrics         │
//!     └──────────────────┘
//!
//!     observability (named loggers, metrics) is shared by all of the above
//! ```

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    workflow_manager::launch(std::env::args_os()).await
}
