//! Liveness and readiness probes.
//!
//! # Responsibilities
//! - Hold the named checks registered before the manager starts
//! - Evaluate them together with the manager's own status
//! - Serve `/healthz` and `/readyz` (plus `/{probe}/{name}` per check)
//!
//! # Design Decisions
//! - Liveness always includes the scheduler heartbeat; it ignores leadership
//! - Readiness always includes the lifecycle state and leadership, so a
//!   standby replica is alive but not ready
//! - Response bodies are plain text; only the status code is the contract

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::manager::state::{ManagerState, ManagerStatus};
use crate::manager::SetupError;

/// A health check: `Ok` when healthy, `Err(reason)` otherwise.
pub type Checker = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// A check that always passes.
pub fn ping() -> Checker {
    Arc::new(|| Ok(()))
}

/// Heartbeats older than this fail liveness.
pub const HEARTBEAT_STALE_AFTER: Duration = Duration::from_secs(10);

const SCHEDULER_CHECK: &str = "scheduler";
const LIFECYCLE_CHECK: &str = "manager";
const LEADER_CHECK: &str = "leader-election";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Liveness,
    Readiness,
}

impl ProbeKind {
    fn endpoint(self) -> &'static str {
        match self {
            ProbeKind::Liveness => "healthz",
            ProbeKind::Readiness => "readyz",
        }
    }

    fn builtin_names(self) -> &'static [&'static str] {
        match self {
            ProbeKind::Liveness => &[SCHEDULER_CHECK],
            ProbeKind::Readiness => &[LIFECYCLE_CHECK, LEADER_CHECK],
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub error: Option<String>,
}

impl CheckResult {
    fn new(name: &str, outcome: Result<(), String>) -> Self {
        Self {
            name: name.to_string(),
            error: outcome.err(),
        }
    }

    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of one probe evaluation.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub kind: ProbeKind,
    pub checks: Vec<CheckResult>,
}

impl ProbeReport {
    pub fn healthy(&self) -> bool {
        self.checks.iter().all(CheckResult::passed)
    }

    fn render(&self, verbose: bool) -> String {
        let mut body = String::new();
        for check in &self.checks {
            match &check.error {
                None if verbose => body.push_str(&format!("[+]{} ok\n", check.name)),
                None => {}
                Some(reason) => body.push_str(&format!("[-]{} failed: {}\n", check.name, reason)),
            }
        }
        if self.healthy() {
            if verbose {
                body.push_str(&format!("{} check passed\n", self.kind));
            } else {
                body.push_str("ok");
            }
        } else {
            body.push_str(&format!("{} check failed\n", self.kind));
        }
        body
    }
}

/// Registered checks plus the manager status they are evaluated against.
pub struct HealthProbes {
    liveness: RwLock<Vec<(String, Checker)>>,
    readiness: RwLock<Vec<(String, Checker)>>,
    status: Arc<ManagerStatus>,
}

impl HealthProbes {
    pub fn new(status: Arc<ManagerStatus>) -> Self {
        Self {
            liveness: RwLock::new(Vec::new()),
            readiness: RwLock::new(Vec::new()),
            status,
        }
    }

    fn checks(&self, kind: ProbeKind) -> &RwLock<Vec<(String, Checker)>> {
        match kind {
            ProbeKind::Liveness => &self.liveness,
            ProbeKind::Readiness => &self.readiness,
        }
    }

    /// Register a named check. Names are unique per probe.
    pub fn add_check(&self, kind: ProbeKind, name: &str, checker: Checker) -> Result<(), SetupError> {
        if name.is_empty() || name.contains('/') {
            return Err(SetupError::InvalidCheckName(name.to_string()));
        }
        let mut checks = self.checks(kind).write().map_err(|_| SetupError::Poisoned)?;
        if kind.builtin_names().contains(&name) || checks.iter().any(|(existing, _)| existing == name) {
            return Err(SetupError::DuplicateCheck {
                probe: kind.endpoint(),
                name: name.to_string(),
            });
        }
        checks.push((name.to_string(), checker));
        Ok(())
    }

    /// Evaluate every check of a probe, built-ins first.
    pub fn report(&self, kind: ProbeKind) -> ProbeReport {
        let mut results: Vec<CheckResult> = kind
            .builtin_names()
            .iter()
            .map(|name| CheckResult::new(name, self.builtin(name)))
            .collect();

        match self.checks(kind).read() {
            Ok(checks) => results.extend(checks.iter().map(|(name, checker)| CheckResult::new(name, checker()))),
            Err(_) => results.push(CheckResult::new("registry", Err("check registry poisoned".into()))),
        }

        ProbeReport { kind, checks: results }
    }

    /// Evaluate a single named check.
    pub fn check(&self, kind: ProbeKind, name: &str) -> Option<CheckResult> {
        if kind.builtin_names().contains(&name) {
            return Some(CheckResult::new(name, self.builtin(name)));
        }
        let checks = self.checks(kind).read().ok()?;
        checks
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(name, checker)| CheckResult::new(name, checker()))
    }

    fn builtin(&self, name: &str) -> Result<(), String> {
        let state = self.status.state();
        match name {
            SCHEDULER_CHECK => {
                if !matches!(state, ManagerState::Running | ManagerState::ShuttingDown) {
                    return Err(format!("manager is {}", state));
                }
                let age = self.status.heartbeat_age();
                if age > HEARTBEAT_STALE_AFTER {
                    return Err(format!("scheduler unresponsive for {:?}", age));
                }
                Ok(())
            }
            LIFECYCLE_CHECK if state != ManagerState::Running => Err(format!("manager is {}", state)),
            LEADER_CHECK if !self.status.is_elected() => Err("waiting for leader lease".to_string()),
            _ => Ok(()),
        }
    }

    /// Router serving both probes.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/healthz", get(liveness))
            .route("/healthz/{name}", get(liveness_check))
            .route("/readyz", get(readiness))
            .route("/readyz/{name}", get(readiness_check))
            .with_state(self)
    }
}

async fn liveness(State(probes): State<Arc<HealthProbes>>, Query(query): Query<HashMap<String, String>>) -> Response {
    respond_report(probes.report(ProbeKind::Liveness), query.contains_key("verbose"))
}

async fn readiness(State(probes): State<Arc<HealthProbes>>, Query(query): Query<HashMap<String, String>>) -> Response {
    respond_report(probes.report(ProbeKind::Readiness), query.contains_key("verbose"))
}

async fn liveness_check(State(probes): State<Arc<HealthProbes>>, Path(name): Path<String>) -> Response {
    respond_check(probes.check(ProbeKind::Liveness, &name))
}

async fn readiness_check(State(probes): State<Arc<HealthProbes>>, Path(name): Path<String>) -> Response {
    respond_check(probes.check(ProbeKind::Readiness, &name))
}

fn respond_report(report: ProbeReport, verbose: bool) -> Response {
    let status = if report.healthy() {
        StatusCode::OK
    } else {
        tracing::debug!(probe = %report.kind, "Probe failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, report.render(verbose)).into_response()
}

fn respond_check(result: Option<CheckResult>) -> Response {
    match result {
        None => (StatusCode::NOT_FOUND, "no such check").into_response(),
        Some(CheckResult { error: None, .. }) => (StatusCode::OK, "ok").into_response(),
        Some(CheckResult { error: Some(reason), .. }) => {
            (StatusCode::INTERNAL_SERVER_ERROR, format!("internal server error: {}", reason)).into_response()
        }
    }
}
