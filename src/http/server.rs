//! Workflow API server.
//!
//! # Responsibilities
//! - Build the Axum router with the workflow handlers
//! - Wire up middleware (request ID, timeout, tracing, metrics)
//! - Bind the listen address and serve until cancelled
//!
//! # Design Decisions
//! - Serves on every replica; the API does not depend on leadership
//! - Binding happens inside `serve`, so a bind failure surfaces as a router
//!   failure the orchestrator can supervise

use std::net::SocketAddr;
use std::time::Duration;

use axum::{body::Body, http::Request, middleware, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::Instrument;

use crate::http::handlers::{routes, ApiState};
use crate::http::middleware::track_requests;
use crate::http::request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
use crate::k8s::ClusterClient;
use crate::observability::Logger;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("failed to bind workflow API on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("workflow API server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// HTTP server for the workflow API.
pub struct RouterServer {
    listen: SocketAddr,
    router: Router,
    logger: Logger,
}

impl RouterServer {
    /// `router_logger` scopes the server; `handler_logger` is handed to the
    /// request handlers.
    pub fn new(
        listen: SocketAddr,
        client: ClusterClient,
        router_logger: Logger,
        handler_logger: Logger,
        request_timeout: Duration,
    ) -> Self {
        let state = ApiState {
            client,
            logger: handler_logger,
        };
        Self {
            listen,
            router: build_router(state, request_timeout, &router_logger),
            logger: router_logger,
        }
    }

    /// Bind and serve until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), RouterError> {
        let span = self.logger.span().clone();
        async move {
            let listener = TcpListener::bind(self.listen)
                .await
                .map_err(|source| RouterError::Bind {
                    addr: self.listen,
                    source,
                })?;
            let addr = listener.local_addr().map_err(RouterError::Serve)?;
            tracing::info!(address = %addr, "Workflow API listening");

            axum::serve(listener, self.router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .map_err(RouterError::Serve)?;

            tracing::info!("Workflow API stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// The router, for serving without a socket.
    pub fn into_router(self) -> Router {
        self.router
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
fn build_router(state: ApiState, request_timeout: Duration, logger: &Logger) -> Router {
    let parent = logger.span().clone();
    let trace = TraceLayer::new_for_http().make_span_with(move |req: &Request<Body>| {
        tracing::info_span!(
            parent: &parent,
            "request",
            method = %req.method(),
            uri = %req.uri(),
            request_id = req.request_id().unwrap_or("-"),
        )
    });

    routes(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
            .layer(trace)
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(middleware::from_fn(track_requests))
            .layer(TimeoutLayer::new(request_timeout)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::cache::WorkflowCache;
    use crate::k8s::scheme::{workflow_resource, Scheme};
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use kube::api::DynamicObject;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn client(objects: Vec<DynamicObject>) -> ClusterClient {
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        let kube_client = kube::Client::try_from(config).unwrap();
        let cache = WorkflowCache::seeded(workflow_resource(), "argo", objects);
        ClusterClient::new(kube_client, "argo", Arc::new(Scheme::with_defaults().unwrap()), cache)
    }

    fn workflow(name: &str, phase: &str) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &workflow_resource()).within("argo");
        obj.data = json!({"spec": {}, "status": {"phase": phase}});
        obj
    }

    fn router(objects: Vec<DynamicObject>) -> Router {
        let logger = Logger::named("run");
        RouterServer::new(
            "127.0.0.1:0".parse().unwrap(),
            client(objects),
            logger.with_name("router"),
            logger.with_name("handler"),
            Duration::from_secs(5),
        )
        .into_router()
    }

    async fn call(router: Router, method: &str, uri: &str) -> (StatusCode, Option<String>, Value) {
        let response = router
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, id, body)
    }

    #[tokio::test]
    async fn test_info() {
        let (status, id, body) = call(router(vec![workflow("a", "Running")]), "GET", "/api/v1/info").await;
        assert_eq!(status, StatusCode::OK);
        assert!(id.is_some());
        assert_eq!(body["namespace"], "argo");
        assert_eq!(body["cache_synced"], true);
        assert_eq!(body["workflows"], 1);
        assert_eq!(body["types"], 5);
    }

    #[tokio::test]
    async fn test_list_from_cache() {
        let objects = vec![workflow("b", "Succeeded"), workflow("a", "Running")];
        let (status, _, body) = call(router(objects), "GET", "/api/v1/workflows").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"][0]["name"], "a");
        assert_eq!(body["items"][1]["phase"], "Succeeded");
    }

    #[tokio::test]
    async fn test_get_cached_and_missing() {
        let (status, _, body) = call(router(vec![workflow("a", "Running")]), "GET", "/api/v1/workflows/a").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"]["name"], "a");

        let (status, _, body) = call(router(vec![]), "GET", "/api/v1/workflows/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let response = router(vec![])
            .oneshot(
                Request::builder()
                    .uri("/api/v1/info")
                    .header("x-request-id", "caller-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "caller-id");
    }

    #[tokio::test]
    async fn test_serve_reports_bind_failure() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let logger = Logger::named("run");
        let server = RouterServer::new(
            taken.local_addr().unwrap(),
            client(vec![]),
            logger.with_name("router"),
            logger.with_name("handler"),
            Duration::from_secs(5),
        );
        let err = server.serve(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RouterError::Bind { .. }));
    }
}
