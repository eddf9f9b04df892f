//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define manager and API metrics
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `workflow_manager_state` (gauge): manager lifecycle state, 0-4
//! - `workflow_manager_leader` (gauge): 1 while this replica holds the lease
//! - `workflow_manager_lease_attempts_total` (counter): lease calls by outcome
//! - `workflow_manager_runnable_exits_total` (counter): runnable exits by outcome
//! - `workflow_api_requests_total` (counter): API requests by method, status
//! - `workflow_api_request_duration_seconds` (histogram): API latency
//!
//! # Design Decisions
//! - One process-wide recorder, installed on first use
//! - Histogram samples are drained by a periodic upkeep task, not only on scrape
//! - The endpoint is served by the manager alongside the health probes

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use axum::{extract::State, routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio_util::sync::CancellationToken;

use crate::manager::ManagerState;

/// How often buffered histogram samples are folded into their summaries.
pub const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and return a handle for rendering.
pub fn install() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                tracing::warn!("A metrics recorder was already installed; /metrics will be empty");
            }
            handle
        })
        .clone()
}

/// Router serving `GET /metrics`.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .with_state(handle)
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// Run recorder upkeep every `interval` until `shutdown` is cancelled.
pub async fn upkeep(handle: PrometheusHandle, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => handle.run_upkeep(),
        }
    }
}

pub fn set_manager_state(state: ManagerState) {
    gauge!("workflow_manager_state").set(state as u8 as f64);
}

pub fn set_leader(leader: bool) {
    gauge!("workflow_manager_leader").set(if leader { 1.0 } else { 0.0 });
}

pub fn record_lease_attempt(outcome: &'static str) {
    counter!("workflow_manager_lease_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_runnable_exit(runnable: &str, outcome: &'static str) {
    counter!(
        "workflow_manager_runnable_exits_total",
        "runnable" => runnable.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "workflow_api_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("workflow_api_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_metrics_render() {
        let handle = install();
        set_leader(true);
        record_lease_attempt("acquired");
        let text = handle.render();
        assert!(text.contains("workflow_manager_leader"));
        assert!(text.contains("workflow_manager_lease_attempts_total"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upkeep_runs_until_cancelled() {
        let handle = install();
        record_request("GET", 200, Instant::now());

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(upkeep(handle.clone(), UPKEEP_INTERVAL, shutdown.clone()));
        tokio::time::sleep(UPKEEP_INTERVAL * 2).await;
        assert!(!task.is_finished());

        shutdown.cancel();
        task.await.unwrap();
        assert!(handle.render().contains("workflow_api_request_duration_seconds"));
    }
}
