//! Cluster connection descriptor.

use std::path::Path;

use kube::config::{KubeConfigOptions, Kubeconfig};

use crate::k8s::ConnectionError;

/// How to reach the API server: endpoint, credentials and TLS settings.
///
/// Opaque to the rest of the process; only the cluster-facing code turns it
/// into clients.
#[derive(Clone)]
pub struct ClusterConnection {
    config: kube::Config,
}

impl ClusterConnection {
    /// Resolve the ambient cluster configuration.
    ///
    /// With an explicit kubeconfig that file is used; otherwise the in-cluster
    /// service account, then `KUBECONFIG` / `~/.kube/config`.
    pub async fn infer(kubeconfig: Option<&Path>) -> Result<Self, ConnectionError> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
            }
            None => kube::Config::infer().await?,
        };
        Ok(Self { config })
    }

    pub fn from_config(config: kube::Config) -> Self {
        Self { config }
    }

    /// The API server URL, for logging.
    pub fn endpoint(&self) -> String {
        self.config.cluster_url.to_string()
    }

    /// Default namespace of the resolved context.
    pub fn default_namespace(&self) -> &str {
        &self.config.default_namespace
    }

    /// Build a client. Does not contact the API server.
    pub fn client(&self) -> Result<kube::Client, ConnectionError> {
        kube::Client::try_from(self.config.clone()).map_err(|source| ConnectionError::Client {
            endpoint: self.endpoint(),
            source,
        })
    }
}

impl std::fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("endpoint", &self.endpoint())
            .finish_non_exhaustive()
    }
}
