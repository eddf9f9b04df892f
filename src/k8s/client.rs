//! Namespace-scoped cluster client and its bootstrap.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject};

use crate::k8s::cache::{WorkflowCache, WorkflowInformer};
use crate::k8s::connection::ClusterConnection;
use crate::k8s::lease::KubeLeaseBackend;
use crate::k8s::scheme::{workflow_resource, Scheme, WORKFLOW_GROUP, WORKFLOW_KIND};
use crate::k8s::{BootstrapError, ConnectionError, SchemeError};
use crate::manager::leader::LeaseBackend;

/// Cluster client scoped to one namespace, shared by the API handlers.
///
/// Cheap to clone; clones share the connection pool and the cache.
#[derive(Clone)]
pub struct ClusterClient {
    client: kube::Client,
    namespace: Arc<str>,
    scheme: Arc<Scheme>,
    workflows: WorkflowCache,
}

impl ClusterClient {
    pub fn new(client: kube::Client, namespace: &str, scheme: Arc<Scheme>, workflows: WorkflowCache) -> Self {
        Self {
            client,
            namespace: Arc::from(namespace),
            scheme,
            workflows,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn workflows(&self) -> &WorkflowCache {
        &self.workflows
    }

    /// Workflow API bound to the client's namespace.
    pub fn workflow_api(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, self.workflows.resource())
    }
}

/// Result of a successful bootstrap.
pub struct Bootstrapped {
    pub client: ClusterClient,
    /// Runnable that fills the workflow cache, if the cache is live.
    pub informer: Option<WorkflowInformer>,
}

/// Everything the orchestrator needs from the cluster side.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Resolve the connection descriptor.
    async fn connect(&self) -> Result<ClusterConnection, ConnectionError>;

    /// Lease store used for leader election.
    fn lease_backend(
        &self,
        connection: &ClusterConnection,
        namespace: &str,
        name: &str,
    ) -> Result<Arc<dyn LeaseBackend>, ConnectionError>;

    /// Build the namespace-scoped client and shared cache.
    async fn bootstrap(
        &self,
        connection: &ClusterConnection,
        namespace: &str,
        scheme: Arc<Scheme>,
    ) -> Result<Bootstrapped, BootstrapError>;
}

/// Provider backed by a real Kubernetes API server.
#[derive(Debug, Clone, Default)]
pub struct KubeProvider {
    kubeconfig: Option<PathBuf>,
}

impl KubeProvider {
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self { kubeconfig }
    }
}

#[async_trait]
impl ClusterProvider for KubeProvider {
    async fn connect(&self) -> Result<ClusterConnection, ConnectionError> {
        ClusterConnection::infer(self.kubeconfig.as_deref()).await
    }

    fn lease_backend(
        &self,
        connection: &ClusterConnection,
        namespace: &str,
        name: &str,
    ) -> Result<Arc<dyn LeaseBackend>, ConnectionError> {
        Ok(Arc::new(KubeLeaseBackend::new(connection.client()?, namespace, name)))
    }

    async fn bootstrap(
        &self,
        connection: &ClusterConnection,
        namespace: &str,
        scheme: Arc<Scheme>,
    ) -> Result<Bootstrapped, BootstrapError> {
        bootstrap(connection, namespace, scheme).await
    }
}

/// Connect, verify the scheme against the cluster, and build the cache.
///
/// No retries: the caller treats any failure as fatal.
pub async fn bootstrap(
    connection: &ClusterConnection,
    namespace: &str,
    scheme: Arc<Scheme>,
) -> Result<Bootstrapped, BootstrapError> {
    let endpoint = connection.endpoint();
    let client = connection.client()?;

    let version = client
        .apiserver_version()
        .await
        .map_err(|source| ConnectionError::from_request(&endpoint, source))?;
    tracing::info!(
        endpoint = %endpoint,
        version = %version.git_version,
        namespace = %namespace,
        "Connected to Kubernetes API server"
    );

    verify_scheme(&client, &endpoint, &scheme).await?;

    let resource = scheme
        .get(WORKFLOW_GROUP, WORKFLOW_KIND)
        .cloned()
        .unwrap_or_else(workflow_resource);
    let api = Api::namespaced_with(client.clone(), namespace, &resource);
    let (workflows, informer) = WorkflowCache::new(api, resource, namespace);

    Ok(Bootstrapped {
        client: ClusterClient::new(client, namespace, scheme, workflows),
        informer: Some(informer),
    })
}

/// Check that the API server serves every registered resource.
async fn verify_scheme(client: &kube::Client, endpoint: &str, scheme: &Scheme) -> Result<(), BootstrapError> {
    for (api_version, resources) in scheme.by_api_version() {
        let listing = match api_version.split_once('/') {
            None => client.list_core_api_resources(api_version).await,
            Some(_) => client.list_api_group_resources(api_version).await,
        };
        let served = match listing {
            Ok(list) => list,
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                return Err(SchemeError::NotServed {
                    api_version: api_version.to_string(),
                    plural: resources.iter().map(|r| r.plural.clone()).collect::<Vec<_>>().join(", "),
                }
                .into());
            }
            Err(source) => return Err(ConnectionError::from_request(endpoint, source).into()),
        };

        for resource in &resources {
            if !served.resources.iter().any(|r| r.name == resource.plural) {
                return Err(SchemeError::NotServed {
                    api_version: api_version.to_string(),
                    plural: resource.plural.clone(),
                }
                .into());
            }
        }
        tracing::debug!(api_version = %api_version, count = resources.len(), "API types verified");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, Response, StatusCode};
    use serde_json::json;

    fn resource_list(group_version: &str, served: &[(&str, &str)]) -> serde_json::Value {
        let resources: Vec<_> = served
            .iter()
            .map(|(name, kind)| {
                json!({"name": name, "singularName": "", "namespaced": true, "kind": kind, "verbs": ["get", "list"]})
            })
            .collect();
        json!({"kind": "APIResourceList", "groupVersion": group_version, "resources": resources})
    }

    /// Client over an in-memory API server that serves discovery documents.
    fn discovery_client(serve_workflows: bool) -> kube::Client {
        let service = tower::service_fn(move |req: Request<kube::client::Body>| async move {
            let body = match req.uri().path() {
                "/api/v1" => Some(resource_list(
                    "v1",
                    &[("pods", "Pod"), ("configmaps", "ConfigMap"), ("events", "Event")],
                )),
                "/apis/coordination.k8s.io/v1" => Some(resource_list("coordination.k8s.io/v1", &[("leases", "Lease")])),
                "/apis/argoproj.io/v1alpha1" if serve_workflows => {
                    Some(resource_list("argoproj.io/v1alpha1", &[("workflows", "Workflow")]))
                }
                "/apis/argoproj.io/v1alpha1" => Some(resource_list("argoproj.io/v1alpha1", &[])),
                _ => None,
            };
            let response = match body {
                Some(body) => Response::new(Body::from(body.to_string())),
                None => {
                    let status = json!({
                        "kind": "Status", "apiVersion": "v1", "status": "Failure",
                        "message": "not found", "reason": "NotFound", "code": 404
                    });
                    let mut response = Response::new(Body::from(status.to_string()));
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    response
                }
            };
            Ok::<_, std::convert::Infallible>(response)
        });
        kube::Client::new(service, "argo")
    }

    #[tokio::test]
    async fn test_scheme_verified_when_every_type_is_served() {
        let scheme = Scheme::with_defaults().unwrap();
        let client = discovery_client(true);
        verify_scheme(&client, "memory", &scheme).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_workflow_type_is_a_scheme_error() {
        let scheme = Scheme::with_defaults().unwrap();
        let client = discovery_client(false);
        let err = verify_scheme(&client, "memory", &scheme).await.unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Scheme(SchemeError::NotServed { ref plural, .. }) if plural == "workflows"
        ));
    }

    #[tokio::test]
    async fn test_unknown_group_is_a_scheme_error() {
        let mut scheme = Scheme::with_defaults().unwrap();
        let mut rollout = workflow_resource();
        rollout.group = "argoproj.example".into();
        rollout.api_version = "argoproj.example/v1".into();
        rollout.version = "v1".into();
        rollout.kind = "Rollout".into();
        rollout.plural = "rollouts".into();
        scheme.register(rollout).unwrap();

        let err = verify_scheme(&discovery_client(true), "memory", &scheme).await.unwrap_err();
        match err {
            BootstrapError::Scheme(SchemeError::NotServed { api_version, .. }) => {
                assert_eq!(api_version, "argoproj.example/v1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
