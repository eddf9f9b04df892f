//! Configuration loading: config file, flags and environment.

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::cli::Cli;
use crate::config::schema::{
    BindAddress, FileConfig, ProcessConfig, DEFAULT_HEALTH_PROBE_ADDRESS, DEFAULT_LISTEN_ADDRESS,
    DEFAULT_METRICS_ADDRESS,
};
use crate::config::validation::validate_config;
use crate::config::ConfigError;

/// Load the optional TOML config file.
pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Build and validate the process configuration.
///
/// Flags (and their environment variables) win over the file, the file wins
/// over built-in defaults.
pub fn resolve(cli: Cli) -> Result<ProcessConfig, ConfigError> {
    let file = match &cli.config {
        Some(path) => load_file(path)?,
        None => FileConfig::default(),
    };
    let defaults = ProcessConfig::default();

    let metrics_raw = pick(cli.metrics_bind_address, file.metrics_bind_address)
        .unwrap_or_else(|| DEFAULT_METRICS_ADDRESS.to_string());
    let probe_raw = pick(cli.health_probe_bind_address, file.health_probe_bind_address)
        .unwrap_or_else(|| DEFAULT_HEALTH_PROBE_ADDRESS.to_string());
    let listen_raw = pick(cli.listen, file.listen).unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string());

    let metrics_address = BindAddress::parse("--metrics-bind-address", &metrics_raw)?;
    let health_probe_address = BindAddress::parse("--health-probe-bind-address", &probe_raw)?;
    let listen_address = BindAddress::parse("--listen", &listen_raw)?
        .socket_addr()
        .ok_or_else(|| ConfigError::InvalidAddress {
            flag: "--listen",
            value: listen_raw.clone(),
            reason: "the workflow API cannot be disabled".to_string(),
        })?;

    let namespace = pick(cli.namespace, file.namespace).unwrap_or(defaults.namespace);

    let le_file = file.leader_election;
    let le_defaults = defaults.leader_election;
    let mut leader_election = le_defaults.clone();
    leader_election.enabled = pick(cli.leader_elect, le_file.enabled).unwrap_or(le_defaults.enabled);
    leader_election.id = pick(cli.leader_election_id, le_file.id).unwrap_or(le_defaults.id);
    leader_election.namespace =
        pick(cli.leader_election_namespace, le_file.namespace).unwrap_or_else(|| namespace.clone());
    leader_election.lease_duration = secs_or(
        pick(cli.lease_duration_secs, le_file.lease_duration_secs),
        le_defaults.lease_duration,
    );
    leader_election.renew_deadline = secs_or(
        pick(cli.renew_deadline_secs, le_file.renew_deadline_secs),
        le_defaults.renew_deadline,
    );
    leader_election.retry_period = secs_or(
        pick(cli.retry_period_secs, le_file.retry_period_secs),
        le_defaults.retry_period,
    );

    let mut logging = defaults.logging;
    if let Some(level) = pick(cli.log_level, file.logging.level) {
        logging.level = level;
    }
    if let Some(format) = pick(cli.log_format, file.logging.format) {
        logging.format = format;
    }

    let config = ProcessConfig {
        metrics_address,
        health_probe_address,
        listen_address,
        namespace,
        leader_election,
        graceful_shutdown_timeout: secs_or(
            pick(cli.graceful_shutdown_timeout_secs, file.graceful_shutdown_timeout_secs),
            defaults.graceful_shutdown_timeout,
        ),
        request_timeout: secs_or(
            pick(cli.request_timeout_secs, file.request_timeout_secs),
            defaults.request_timeout,
        ),
        exit_on_router_failure: pick(cli.exit_on_router_failure, file.exit_on_router_failure)
            .unwrap_or(defaults.exit_on_router_failure),
        kubeconfig: pick(cli.kubeconfig, file.kubeconfig),
        logging,
    };

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn pick<T>(flag: Option<T>, file: Option<T>) -> Option<T> {
    flag.or(file)
}

fn secs_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(default)
}
