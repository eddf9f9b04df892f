//! Kubernetes client bootstrap subsystem.
//!
//! # Data Flow
//! ```text
//! --kubeconfig / in-cluster / KUBECONFIG
//!     → connection.rs (ClusterConnection descriptor)
//!     → client.rs (API server reachable? scheme types served?)
//!     → ClusterClient (namespace-scoped) + WorkflowInformer runnable
//!     → lease.rs (leader election Lease, built from the same descriptor)
//! ```
//!
//! # Design Decisions
//! - Bootstrap never retries; a control process has no degraded mode without
//!   its API server
//! - The scheme is an explicit value, verified against the cluster once
//! - `ClusterProvider` is the seam the orchestrator is tested through

pub mod cache;
pub mod client;
pub mod connection;
pub mod lease;
pub mod scheme;

use thiserror::Error;

pub use cache::{WorkflowCache, WorkflowInformer};
pub use client::{bootstrap, Bootstrapped, ClusterClient, ClusterProvider, KubeProvider};
pub use connection::ClusterConnection;
pub use lease::KubeLeaseBackend;
pub use scheme::Scheme;

/// The cluster could not be reached or refused our credentials.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to infer cluster configuration: {0}")]
    Infer(#[from] kube::config::InferConfigError),

    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("failed to build client for {endpoint}: {source}")]
    Client {
        endpoint: String,
        #[source]
        source: kube::Error,
    },

    #[error("cluster endpoint {endpoint} is unreachable: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("credentials rejected by {endpoint}: {source}")]
    Unauthorized {
        endpoint: String,
        #[source]
        source: kube::Error,
    },
}

impl ConnectionError {
    /// Classify a failed API request.
    pub fn from_request(endpoint: &str, source: kube::Error) -> Self {
        match &source {
            kube::Error::Api(resp) if resp.code == 401 || resp.code == 403 => ConnectionError::Unauthorized {
                endpoint: endpoint.to_string(),
                source,
            },
            _ => ConnectionError::Unreachable {
                endpoint: endpoint.to_string(),
                source: Box::new(source),
            },
        }
    }
}

/// A required API type is not available.
#[derive(Debug, Error)]
pub enum SchemeError {
    #[error("kind {kind} already registered as {existing}, cannot register as {requested}")]
    Conflict {
        kind: String,
        existing: String,
        requested: String,
    },

    #[error("API server does not serve {plural} in {api_version}")]
    NotServed { api_version: String, plural: String },
}

/// Bootstrap failure.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Scheme(#[from] SchemeError),
}
