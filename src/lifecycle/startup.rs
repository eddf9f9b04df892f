//! Startup orchestration.
//!
//! # Responsibilities
//! - Parse flags, load configuration and initialize logging
//! - Connect to the cluster and bootstrap the namespace-scoped client
//! - Build the manager, launch the workflow API, run until shutdown
//! - Map the outcome to the process exit status
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and nothing is retried
//! - The router is launched only after bootstrap succeeds, so a cluster
//!   failure never opens the API port
//! - Router and manager share one token and both are joined before exit
//! - A router failure is logged; it stops the process only with
//!   `--exit-on-router-failure`

use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::{resolve, Cli, LoggingConfig, ProcessConfig};
use crate::error::Error;
use crate::http::{RouterError, RouterServer};
use crate::k8s::{ClusterProvider, KubeProvider, Scheme};
use crate::lifecycle::{signals, Shutdown};
use crate::manager::{ping, Manager, ManagerOptions, Runnable, SetupError};
use crate::observability::{logging, LoggerBindings};

/// Wires the components together and supervises them.
pub struct Orchestrator<P> {
    config: ProcessConfig,
    provider: P,
    loggers: LoggerBindings,
    runnables: Vec<Arc<dyn Runnable>>,
    handle_signals: bool,
}

impl<P: ClusterProvider> Orchestrator<P> {
    pub fn new(config: ProcessConfig, provider: P) -> Self {
        Self {
            config,
            provider,
            loggers: LoggerBindings::new(),
            runnables: Vec::new(),
            handle_signals: false,
        }
    }

    /// Register an extra runnable (a reconciler) on the manager.
    pub fn with_runnable(mut self, runnable: Arc<dyn Runnable>) -> Self {
        self.runnables.push(runnable);
        self
    }

    /// Install SIGTERM/SIGINT handlers before the manager starts.
    pub fn handle_signals(mut self) -> Self {
        self.handle_signals = true;
        self
    }

    /// Run until `shutdown` is triggered or a fatal error occurs.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), Error> {
        let span = self.loggers.setup.span().clone();
        self.run_inner(shutdown).instrument(span).await
    }

    async fn run_inner(self, shutdown: Shutdown) -> Result<(), Error> {
        let Orchestrator {
            config,
            provider,
            loggers,
            runnables,
            handle_signals,
        } = self;

        let connection = provider.connect().await?;
        tracing::info!(endpoint = %connection.endpoint(), "Resolved cluster configuration");

        let scheme = Arc::new(Scheme::with_defaults()?);
        let election = &config.leader_election;
        let lease = if election.enabled {
            Some(provider.lease_backend(&connection, &election.namespace, &election.id)?)
        } else {
            None
        };
        let mut manager = Manager::new(
            ManagerOptions::from(&config),
            scheme.clone(),
            lease,
            loggers.manager.clone(),
        )?;

        let bootstrapped = provider.bootstrap(&connection, &config.namespace, scheme).await?;
        if let Some(informer) = bootstrapped.informer {
            manager.add(Arc::new(informer))?;
        }
        for runnable in runnables {
            manager.add(runnable)?;
        }

        let router = RouterServer::new(
            config.listen_address,
            bootstrapped.client,
            loggers.router.clone(),
            loggers.handler.clone(),
            config.request_timeout,
        );
        let router_task = tokio::spawn(supervise(router, shutdown.clone(), config.exit_on_router_failure));

        let signal_task = match register(&manager, handle_signals, &shutdown) {
            Ok(task) => task,
            Err(e) => {
                shutdown.trigger();
                let _ = join(router_task).await;
                return Err(e.into());
            }
        };

        tracing::info!(
            namespace = %config.namespace,
            leader_election = config.leader_election.enabled,
            "Starting manager"
        );
        let managed = manager.start(shutdown.token()).await;

        shutdown.trigger();
        let routed = join(router_task).await;
        if let Some(task) = signal_task {
            task.abort();
        }

        managed?;
        match routed {
            Err(e) if config.exit_on_router_failure => Err(e.into()),
            _ => {
                tracing::info!("Shutdown complete");
                Ok(())
            }
        }
    }
}

/// Register the ping checks and, if requested, the signal handlers.
fn register(
    manager: &Manager,
    handle_signals: bool,
    shutdown: &Shutdown,
) -> Result<Option<JoinHandle<()>>, SetupError> {
    manager.add_healthz_check("healthz", ping())?;
    manager.add_readyz_check("readyz", ping())?;
    if !handle_signals {
        return Ok(None);
    }
    signals::install(shutdown.clone())
        .map(Some)
        .map_err(SetupError::Signals)
}

async fn supervise(server: RouterServer, shutdown: Shutdown, fatal: bool) -> Result<(), RouterError> {
    let result = server.serve(shutdown.token()).await;
    if let Err(e) = &result {
        tracing::error!(
            component = "router",
            kind = "RouterLaunchError",
            error = %e,
            fatal,
            "Workflow API failed"
        );
        if fatal {
            shutdown.trigger();
        }
    }
    result
}

async fn join(task: JoinHandle<Result<(), RouterError>>) -> Result<(), RouterError> {
    match task.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "Workflow API task aborted");
            Ok(())
        }
    }
}

/// Process entry point: parse `args`, run, and return the exit status.
pub async fn launch<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    ExitCode::from(run_process(args).await)
}

async fn run_process<I, T>(args: I) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { 1 } else { 0 };
        }
    };

    let config = match resolve(cli).and_then(|config| logging::init(&config.logging).map(|_| config)) {
        Ok(config) => config,
        Err(e) => {
            let _ = logging::init(&LoggingConfig::default());
            let result: Result<(), Error> = Err(Error::from(e));
            report(&result);
            return exit_status(&result);
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = %config.namespace,
        listen = %config.listen_address,
        metrics = %config.metrics_address,
        health_probe = %config.health_probe_address,
        "Starting workflow manager"
    );

    let provider = KubeProvider::new(config.kubeconfig.clone());
    let result = Orchestrator::new(config, provider)
        .handle_signals()
        .run(Shutdown::new())
        .await;
    report(&result);
    exit_status(&result)
}

/// 0 on graceful shutdown, 1 on any fatal error.
pub fn exit_status<T>(result: &Result<T, Error>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

fn report<T>(result: &Result<T, Error>) {
    if let Err(e) = result {
        tracing::error!(component = e.component(), kind = e.kind(), error = %e, "Fatal error");
    }
}
