//! Workflow API handlers.
//!
//! Reads are served from the informer cache once it has synced; before that
//! they fall through to the API server. Writes always go to the API server.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use kube::api::{DeleteParams, DynamicObject, ListParams, PostParams};
use kube::core::ApiResource;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::http::response::ApiError;
use crate::k8s::ClusterClient;
use crate::observability::Logger;

/// State shared by every handler.
#[derive(Clone)]
pub struct ApiState {
    pub client: ClusterClient,
    pub logger: Logger,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InfoResponse {
    pub name: String,
    pub version: String,
    pub namespace: String,
    pub cache_synced: bool,
    pub workflows: usize,
    /// API types registered in the scheme.
    pub types: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub name: String,
    pub namespace: String,
    pub phase: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

impl From<&DynamicObject> for WorkflowSummary {
    fn from(obj: &DynamicObject) -> Self {
        Self {
            name: obj.metadata.name.clone().unwrap_or_default(),
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            phase: obj
                .data
                .pointer("/status/phase")
                .and_then(Value::as_str)
                .map(str::to_string),
            created: obj.metadata.creation_timestamp.as_ref().map(|t| t.0),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowList {
    pub synced: bool,
    pub items: Vec<WorkflowSummary>,
}

/// Routes under `/api/v1`.
pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/info", get(info))
        .route("/api/v1/workflows", get(list_workflows).post(submit_workflow))
        .route("/api/v1/workflows/{name}", get(get_workflow).delete(delete_workflow))
        .with_state(state)
}

async fn info(State(state): State<ApiState>) -> Json<InfoResponse> {
    let cache = state.client.workflows();
    Json(InfoResponse {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        namespace: state.client.namespace().to_string(),
        cache_synced: cache.is_synced(),
        workflows: cache.list().len(),
        types: state.client.scheme().len(),
    })
}

async fn list_workflows(State(state): State<ApiState>) -> Result<Json<WorkflowList>, ApiError> {
    let cache = state.client.workflows();
    if cache.is_synced() {
        let items = cache.list().iter().map(|o| WorkflowSummary::from(o.as_ref())).collect();
        return Ok(Json(WorkflowList { synced: true, items }));
    }

    let list = state.client.workflow_api().list(&ListParams::default()).await?;
    let mut items: Vec<WorkflowSummary> = list.items.iter().map(WorkflowSummary::from).collect();
    items.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(WorkflowList { synced: false, items }))
}

async fn get_workflow(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<DynamicObject>, ApiError> {
    let cache = state.client.workflows();
    let found = if cache.is_synced() {
        cache.get(&name).map(|o| o.as_ref().clone())
    } else {
        state.client.workflow_api().get_opt(&name).await?
    };
    found.map(Json).ok_or(ApiError::NotFound(name))
}

async fn submit_workflow(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<WorkflowSummary>), ApiError> {
    let workflow = prepare_workflow(body, state.client.workflows().resource(), state.client.namespace())?;
    let created = state
        .client
        .workflow_api()
        .create(&PostParams::default(), &workflow)
        .await?;
    let summary = WorkflowSummary::from(&created);
    tracing::info!(parent: state.logger.span(), workflow = %summary.name, "Workflow submitted");
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn delete_workflow(State(state): State<ApiState>, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    match state.client.workflow_api().delete(&name, &DeleteParams::default()).await {
        Ok(_) => {
            tracing::info!(parent: state.logger.span(), workflow = %name, "Workflow deleted");
            Ok(StatusCode::ACCEPTED)
        }
        Err(kube::Error::Api(resp)) if resp.code == 404 => Err(ApiError::NotFound(name)),
        Err(e) => Err(e.into()),
    }
}

/// Turn a submitted body into a Workflow object in `namespace`.
///
/// `apiVersion` and `kind` are filled in; a body naming another namespace is
/// rejected.
pub fn prepare_workflow(body: Value, resource: &ApiResource, namespace: &str) -> Result<DynamicObject, ApiError> {
    let Value::Object(mut map) = body else {
        return Err(ApiError::BadRequest("workflow must be a JSON object".to_string()));
    };
    if !map.get("spec").is_some_and(Value::is_object) {
        return Err(ApiError::BadRequest("workflow spec is required".to_string()));
    }
    map.entry("metadata").or_insert_with(|| json!({}));
    map.insert("apiVersion".to_string(), Value::String(resource.api_version.clone()));
    map.insert("kind".to_string(), Value::String(resource.kind.clone()));

    let mut workflow: DynamicObject =
        serde_json::from_value(Value::Object(map)).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if workflow.metadata.name.is_none() && workflow.metadata.generate_name.is_none() {
        return Err(ApiError::BadRequest("metadata.name or metadata.generateName is required".to_string()));
    }
    match workflow.metadata.namespace.as_deref() {
        Some(ns) if ns != namespace => {
            return Err(ApiError::BadRequest(format!(
                "workflow namespace {} does not match {}",
                ns, namespace
            )));
        }
        _ => workflow.metadata.namespace = Some(namespace.to_string()),
    }
    Ok(workflow)
}
