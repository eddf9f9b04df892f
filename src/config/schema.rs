//! Configuration schema definitions.
//!
//! `ProcessConfig` is the resolved, validated snapshot every component reads
//! from. `FileConfig` mirrors the optional TOML file and only carries the
//! values a file actually sets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigError;

/// Lease name used when `--leader-election-id` is not given.
pub const DEFAULT_LEADER_ELECTION_ID: &str = "3826945b.tongjicad";

pub const DEFAULT_METRICS_ADDRESS: &str = ":8080";
pub const DEFAULT_HEALTH_PROBE_ADDRESS: &str = ":8081";
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:30086";
pub const DEFAULT_NAMESPACE: &str = "argo";

/// Root configuration for the manager process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    /// Metrics endpoint bind address.
    pub metrics_address: BindAddress,

    /// Liveness/readiness endpoint bind address.
    pub health_probe_address: BindAddress,

    /// Workflow API bind address.
    pub listen_address: SocketAddr,

    /// Namespace the manager and client are scoped to.
    pub namespace: String,

    /// Leader election settings.
    pub leader_election: LeaderElectionConfig,

    /// Time allowed for runnables to stop once shutdown begins.
    pub graceful_shutdown_timeout: Duration,

    /// Per-request timeout on the workflow API.
    pub request_timeout: Duration,

    /// Treat a router launch or serve failure as fatal to the process.
    pub exit_on_router_failure: bool,

    /// Explicit kubeconfig; `None` uses in-cluster or default resolution.
    pub kubeconfig: Option<PathBuf>,

    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            metrics_address: BindAddress::all_interfaces(8080),
            health_probe_address: BindAddress::all_interfaces(8081),
            listen_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 30086)),
            namespace: DEFAULT_NAMESPACE.to_string(),
            leader_election: LeaderElectionConfig::default(),
            graceful_shutdown_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            exit_on_router_failure: false,
            kubeconfig: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Leader election settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderElectionConfig {
    /// Participate in leader election.
    pub enabled: bool,

    /// Name of the lease object shared by all replicas.
    pub id: String,

    /// Namespace holding the lease.
    pub namespace: String,

    /// How long a lease is valid without renewal.
    pub lease_duration: Duration,

    /// How long the leader keeps retrying renewal before giving up.
    pub renew_deadline: Duration,

    /// Interval between acquire and renew attempts.
    pub retry_period: Duration,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            id: DEFAULT_LEADER_ELECTION_ID.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `tracing` filter directive (e.g. `info` or `workflow_manager=debug`).
    pub level: String,

    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// A listener address that may be switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindAddress {
    /// The endpoint is not served (`0`).
    Disabled,
    /// Bind to this socket address.
    Socket(SocketAddr),
}

impl BindAddress {
    /// Bind `port` on every IPv4 interface.
    pub fn all_interfaces(port: u16) -> Self {
        BindAddress::Socket(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Parse an address in the forms `0`, `:PORT`, `localhost:PORT` or `IP:PORT`.
    pub fn parse(flag: &'static str, raw: &str) -> Result<Self, ConfigError> {
        let value = raw.trim();
        let invalid = |reason: &str| ConfigError::InvalidAddress {
            flag,
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        if value == "0" {
            return Ok(BindAddress::Disabled);
        }
        if value.is_empty() {
            return Err(invalid("address is empty"));
        }

        if let Some(port) = value.strip_prefix(':') {
            let port: u16 = port.parse().map_err(|_| invalid("port is not a number in 0-65535"))?;
            return Ok(BindAddress::all_interfaces(port));
        }

        if let Some(port) = value.strip_prefix("localhost:") {
            let port: u16 = port.parse().map_err(|_| invalid("port is not a number in 0-65535"))?;
            return Ok(BindAddress::Socket(SocketAddr::from((Ipv4Addr::LOCALHOST, port))));
        }

        value
            .parse::<SocketAddr>()
            .map(BindAddress::Socket)
            .map_err(|_| invalid("expected `0`, `:PORT`, `localhost:PORT` or `IP:PORT`"))
    }

    /// The socket to bind, if the endpoint is enabled.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            BindAddress::Disabled => None,
            BindAddress::Socket(addr) => Some(*addr),
        }
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindAddress::Disabled => write!(f, "disabled"),
            BindAddress::Socket(addr) => write!(f, "{}", addr),
        }
    }
}

/// Settings read from the optional TOML file.
///
/// Every field is optional; anything unset falls through to the built-in
/// default. Command-line flags and environment variables override the file.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub metrics_bind_address: Option<String>,
    pub health_probe_bind_address: Option<String>,
    pub listen: Option<String>,
    pub namespace: Option<String>,
    pub graceful_shutdown_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub exit_on_router_failure: Option<bool>,
    pub kubeconfig: Option<PathBuf>,
    pub leader_election: FileLeaderElection,
    pub logging: FileLogging,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileLeaderElection {
    pub enabled: Option<bool>,
    pub id: Option<String>,
    pub namespace: Option<String>,
    pub lease_duration_secs: Option<u64>,
    pub renew_deadline_secs: Option<u64>,
    pub retry_period_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileLogging {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}
