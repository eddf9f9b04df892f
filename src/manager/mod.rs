//! Reconciliation manager.
//!
//! # Responsibilities
//! - Own the scheme, the health probes, and the registered runnables
//! - Serve `/healthz`, `/readyz` and `/metrics` on their own listeners
//! - Run leader election and gate leader-only runnables on it
//! - Stop everything within the graceful shutdown timeout
//!
//! # Data Flow
//! ```text
//! start(token)
//!     → bind probe + metrics listeners (fail fast)
//!     → Running: heartbeat, probe server, metrics server
//!     → non-leader runnables (informers)
//!     → acquire lease → elected → leader runnables + renew loop
//!     → token cancelled | runnable failed | lease lost
//!     → ShuttingDown: cancel runnables, drain, release lease
//!     → Stopped
//! ```
//!
//! # Design Decisions
//! - Runnables get a child of the caller's token, so a runnable failure stops
//!   its siblings without cancelling the caller
//! - Probe and metrics servers outlive the runnables; readiness goes false
//!   as soon as shutdown begins but liveness keeps answering
//! - The first failure wins; later ones are logged

pub mod health;
pub mod leader;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::config::{BindAddress, LeaderElectionConfig, ProcessConfig};
use crate::k8s::Scheme;
use crate::observability::{metrics, Logger};

pub use health::{ping, Checker, HealthProbes, ProbeKind, ProbeReport};
pub use leader::{LeaderElector, LeaseBackend, LeaseError};
pub use state::{ManagerState, ManagerStatus};

/// Interval between scheduler heartbeats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

pub type RunnableError = Box<dyn std::error::Error + Send + Sync>;

/// A long-running component started by the manager.
#[async_trait]
pub trait Runnable: Send + Sync + 'static {
    /// Unique name, used in logs and errors.
    fn name(&self) -> &str;

    /// Leader-only runnables start once the lease is held.
    fn needs_leader_election(&self) -> bool {
        true
    }

    /// Run until `shutdown` is cancelled. Returning an error stops the manager.
    async fn start(&self, shutdown: CancellationToken) -> Result<(), RunnableError>;
}

/// The manager was configured incorrectly.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("{probe} check {name:?} is already registered")]
    DuplicateCheck { probe: &'static str, name: String },

    #[error("invalid check name {0:?}")]
    InvalidCheckName(String),

    #[error("runnable {0:?} is already registered")]
    DuplicateRunnable(String),

    #[error("leader election is enabled but no lease backend was provided")]
    MissingLeaseBackend,

    #[error("health check registry is poisoned")]
    Poisoned,

    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
}

/// The manager stopped abnormally.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("failed to bind {endpoint} endpoint on {addr}: {source}")]
    Bind {
        endpoint: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("runnable {name} failed: {source}")]
    Runnable {
        name: String,
        #[source]
        source: RunnableError,
    },

    #[error("leadership of lease {lease} lost")]
    LeadershipLost { lease: String },

    #[error("runnables did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Manager settings taken from the process configuration.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Namespace the manager's caches and lease are scoped to.
    pub namespace: String,
    pub metrics_address: BindAddress,
    pub health_probe_address: BindAddress,
    pub leader_election: LeaderElectionConfig,
    pub graceful_shutdown_timeout: Duration,
}

impl From<&ProcessConfig> for ManagerOptions {
    fn from(config: &ProcessConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            metrics_address: config.metrics_address,
            health_probe_address: config.health_probe_address,
            leader_election: config.leader_election.clone(),
            graceful_shutdown_timeout: config.graceful_shutdown_timeout,
        }
    }
}

pub struct Manager {
    options: ManagerOptions,
    scheme: Arc<Scheme>,
    elector: Option<Arc<LeaderElector>>,
    probes: Arc<HealthProbes>,
    status: Arc<ManagerStatus>,
    runnables: Vec<Arc<dyn Runnable>>,
    logger: Logger,
}

impl Manager {
    /// Build a configured manager. `lease` is required when leader election
    /// is enabled and ignored otherwise.
    pub fn new(
        options: ManagerOptions,
        scheme: Arc<Scheme>,
        lease: Option<Arc<dyn LeaseBackend>>,
        logger: Logger,
    ) -> Result<Self, SetupError> {
        let elector = match (options.leader_election.enabled, lease) {
            (true, Some(backend)) => Some(Arc::new(LeaderElector::new(backend, options.leader_election.clone()))),
            (true, None) => return Err(SetupError::MissingLeaseBackend),
            (false, _) => None,
        };

        let status = Arc::new(ManagerStatus::new());
        status.set_state(ManagerState::Configured);

        Ok(Self {
            probes: Arc::new(HealthProbes::new(status.clone())),
            options,
            scheme,
            elector,
            status,
            runnables: Vec::new(),
            logger,
        })
    }

    /// Register a runnable. Names must be unique.
    pub fn add(&mut self, runnable: Arc<dyn Runnable>) -> Result<(), SetupError> {
        let name = runnable.name();
        if name.is_empty() || self.runnables.iter().any(|r| r.name() == name) {
            return Err(SetupError::DuplicateRunnable(name.to_string()));
        }
        self.runnables.push(runnable);
        Ok(())
    }

    pub fn add_healthz_check(&self, name: &str, checker: Checker) -> Result<(), SetupError> {
        self.probes.add_check(ProbeKind::Liveness, name, checker)
    }

    pub fn add_readyz_check(&self, name: &str, checker: Checker) -> Result<(), SetupError> {
        self.probes.add_check(ProbeKind::Readiness, name, checker)
    }

    pub fn probes(&self) -> Arc<HealthProbes> {
        self.probes.clone()
    }

    pub fn status(&self) -> Arc<ManagerStatus> {
        self.status.clone()
    }

    /// Leader election identity, if election is enabled.
    pub fn identity(&self) -> Option<&str> {
        self.elector.as_deref().map(LeaderElector::identity)
    }

    /// Run until `shutdown` is cancelled or a fatal error occurs.
    pub async fn start(self, shutdown: CancellationToken) -> Result<(), ManagerError> {
        let span = self.logger.span().clone();
        self.run(shutdown).instrument(span).await
    }

    async fn run(self, shutdown: CancellationToken) -> Result<(), ManagerError> {
        let Manager {
            options,
            scheme,
            elector,
            probes,
            status,
            runnables,
            ..
        } = self;

        let probe_listener = match bind("health probe", options.health_probe_address).await {
            Ok(listener) => listener,
            Err(e) => {
                status.set_state(ManagerState::Stopped);
                return Err(e);
            }
        };
        let metrics_listener = match bind("metrics", options.metrics_address).await {
            Ok(listener) => listener,
            Err(e) => {
                status.set_state(ManagerState::Stopped);
                return Err(e);
            }
        };

        tracing::info!(
            namespace = %options.namespace,
            types = scheme.len(),
            runnables = runnables.len(),
            leader_election = elector.is_some(),
            "Starting manager"
        );
        status.set_state(ManagerState::Running);
        status.beat();

        let servers = CancellationToken::new();
        let server_tasks = TaskTracker::new();
        server_tasks.spawn(heartbeat(status.clone(), servers.clone()).in_current_span());
        if let Some(listener) = probe_listener {
            server_tasks.spawn(serve("health probe", listener, probes.router(), servers.clone()).in_current_span());
        }
        if let Some(listener) = metrics_listener {
            let handle = metrics::install();
            let upkeep = metrics::upkeep(handle.clone(), metrics::UPKEEP_INTERVAL, servers.clone());
            server_tasks.spawn(upkeep.in_current_span());
            server_tasks.spawn(serve("metrics", listener, metrics::router(handle), servers.clone()).in_current_span());
        }

        let internal = shutdown.child_token();
        let tasks = TaskTracker::new();
        let (failures, mut failed) = mpsc::unbounded_channel::<ManagerError>();

        let (leader_runnables, others): (Vec<_>, Vec<_>) =
            runnables.into_iter().partition(|r| r.needs_leader_election());
        for runnable in others {
            spawn_runnable(&tasks, runnable, internal.clone(), failures.clone());
        }

        let mut first_failure = None;
        let mut held = false;
        match &elector {
            None => status.set_elected(true),
            Some(elector) => {
                tokio::select! {
                    acquired = elector.acquire(&internal) => held = acquired,
                    failure = failed.recv() => first_failure = failure,
                }
                if held {
                    status.set_elected(true);
                    let elector = elector.clone();
                    let token = internal.clone();
                    let failures = failures.clone();
                    tasks.spawn(
                        async move {
                            if let Err(e) = elector.hold(&token).await {
                                let _ = failures.send(e);
                            }
                        }
                        .in_current_span(),
                    );
                }
            }
        }

        if first_failure.is_none() && status.is_elected() {
            for runnable in leader_runnables {
                spawn_runnable(&tasks, runnable, internal.clone(), failures.clone());
            }
        }

        if first_failure.is_none() {
            first_failure = tokio::select! {
                _ = shutdown.cancelled() => None,
                failure = failed.recv() => failure,
            };
        }

        match &first_failure {
            None => tracing::info!("Stopping manager"),
            Some(e) => tracing::error!(error = %e, "Stopping manager after failure"),
        }
        status.set_state(ManagerState::ShuttingDown);
        internal.cancel();
        tasks.close();

        let grace = options.graceful_shutdown_timeout;
        let mut result = first_failure.map_or(Ok(()), Err);
        if tokio::time::timeout(grace, tasks.wait()).await.is_err() {
            tracing::warn!(timeout = ?grace, pending = tasks.len(), "Runnables did not stop in time");
            if result.is_ok() {
                result = Err(ManagerError::ShutdownTimeout(grace));
            }
        }
        while let Ok(e) = failed.try_recv() {
            tracing::warn!(error = %e, "Additional failure during shutdown");
        }

        if let (Some(elector), true) = (&elector, held) {
            if let Err(e) = elector.release().await {
                tracing::warn!(error = %e, "Failed to release leader lease");
            }
        }
        status.set_elected(false);

        servers.cancel();
        server_tasks.close();
        server_tasks.wait().await;

        status.set_state(ManagerState::Stopped);
        tracing::info!("Manager stopped");
        result
    }
}

async fn bind(endpoint: &'static str, address: BindAddress) -> Result<Option<TcpListener>, ManagerError> {
    let Some(addr) = address.socket_addr() else {
        tracing::info!(endpoint, "Endpoint disabled");
        return Ok(None);
    };
    TcpListener::bind(addr)
        .await
        .map(Some)
        .map_err(|source| ManagerError::Bind { endpoint, addr, source })
}

async fn serve(endpoint: &'static str, listener: TcpListener, router: axum::Router, shutdown: CancellationToken) {
    let address = listener.local_addr().ok();
    tracing::info!(endpoint, address = ?address, "Serving endpoint");
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(endpoint, error = %e, "Endpoint server failed");
    }
}

async fn heartbeat(status: Arc<ManagerStatus>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => status.beat(),
        }
    }
}

fn spawn_runnable(
    tasks: &TaskTracker,
    runnable: Arc<dyn Runnable>,
    shutdown: CancellationToken,
    failures: mpsc::UnboundedSender<ManagerError>,
) {
    let name = runnable.name().to_string();
    tasks.spawn(
        async move {
            tracing::info!(runnable = %name, "Starting runnable");
            match runnable.start(shutdown).await {
                Ok(()) => {
                    metrics::record_runnable_exit(&name, "ok");
                    tracing::info!(runnable = %name, "Runnable stopped");
                }
                Err(source) => {
                    metrics::record_runnable_exit(&name, "error");
                    tracing::error!(runnable = %name, error = %source, "Runnable failed");
                    let _ = failures.send(ManagerError::Runnable { name, source });
                }
            }
        }
        .in_current_span(),
    );
}
