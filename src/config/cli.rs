//! Command-line flags.
//!
//! Every flag is optional so the loader can tell an explicit value apart from
//! a default and layer flags over the config file. Defaults are applied in
//! `loader::resolve`.

use clap::Parser;
use std::path::PathBuf;

use crate::config::schema::LogFormat;

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "workflow-manager")]
#[command(version, about = "Kubernetes workflow manager: reconciliation manager and workflow API", long_about = None)]
pub struct Cli {
    /// TOML file providing defaults; flags and environment take precedence.
    #[arg(long, env = "WORKFLOW_MANAGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// The address the metric endpoint binds to ("0" disables it). [default: :8080]
    #[arg(long = "metrics-bind-address", env = "WORKFLOW_MANAGER_METRICS_BIND_ADDRESS")]
    pub metrics_bind_address: Option<String>,

    /// The address the probe endpoint binds to ("0" disables it). [default: :8081]
    #[arg(long = "health-probe-bind-address", env = "WORKFLOW_MANAGER_HEALTH_PROBE_BIND_ADDRESS")]
    pub health_probe_bind_address: Option<String>,

    /// Enable leader election for the manager, ensuring only one active replica. [default: false]
    #[arg(
        long = "leader-elect",
        env = "WORKFLOW_MANAGER_LEADER_ELECT",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub leader_elect: Option<bool>,

    /// Name of the lease used for leader election. [default: 3826945b.tongjicad]
    #[arg(long = "leader-election-id", env = "WORKFLOW_MANAGER_LEADER_ELECTION_ID")]
    pub leader_election_id: Option<String>,

    /// Namespace holding the leader election lease. [default: --namespace]
    #[arg(long = "leader-election-namespace", env = "WORKFLOW_MANAGER_LEADER_ELECTION_NAMESPACE")]
    pub leader_election_namespace: Option<String>,

    /// Seconds a lease stays valid without renewal. [default: 15]
    #[arg(long = "lease-duration-secs", env = "WORKFLOW_MANAGER_LEASE_DURATION_SECS")]
    pub lease_duration_secs: Option<u64>,

    /// Seconds the leader keeps retrying renewal before stepping down. [default: 10]
    #[arg(long = "renew-deadline-secs", env = "WORKFLOW_MANAGER_RENEW_DEADLINE_SECS")]
    pub renew_deadline_secs: Option<u64>,

    /// Seconds between lease acquire and renew attempts. [default: 2]
    #[arg(long = "retry-period-secs", env = "WORKFLOW_MANAGER_RETRY_PERIOD_SECS")]
    pub retry_period_secs: Option<u64>,

    /// Namespace the workflows run in. [default: argo]
    #[arg(long, env = "WORKFLOW_MANAGER_NAMESPACE")]
    pub namespace: Option<String>,

    /// Listening IP address and port of the workflow API. [default: 127.0.0.1:30086]
    #[arg(long, env = "WORKFLOW_MANAGER_LISTEN")]
    pub listen: Option<String>,

    /// Seconds runnables get to stop after a termination signal. [default: 30]
    #[arg(long = "graceful-shutdown-timeout-secs", env = "WORKFLOW_MANAGER_GRACEFUL_SHUTDOWN_TIMEOUT_SECS")]
    pub graceful_shutdown_timeout_secs: Option<u64>,

    /// Seconds before a workflow API request times out. [default: 30]
    #[arg(long = "request-timeout-secs", env = "WORKFLOW_MANAGER_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Exit with an error when the workflow API fails to bind or serve. [default: false]
    #[arg(
        long = "exit-on-router-failure",
        env = "WORKFLOW_MANAGER_EXIT_ON_ROUTER_FAILURE",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub exit_on_router_failure: Option<bool>,

    /// Path to a kubeconfig. Only required if out-of-cluster.
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Log filter directive. [default: info]
    #[arg(long = "log-level", env = "RUST_LOG")]
    pub log_level: Option<String>,

    /// Log output format. [default: pretty]
    #[arg(long = "log-format", env = "WORKFLOW_MANAGER_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_leader_elect_means_true() {
        let cli = Cli::try_parse_from(["workflow-manager", "--leader-elect", "--namespace", "dev"]).unwrap();
        assert_eq!(cli.leader_elect, Some(true));
        assert_eq!(cli.namespace.as_deref(), Some("dev"));
    }

    #[test]
    fn test_explicit_boolean_values() {
        let cli = Cli::try_parse_from(["workflow-manager", "--leader-elect=false"]).unwrap();
        assert_eq!(cli.leader_elect, Some(false));

        let err = Cli::try_parse_from(["workflow-manager", "--leader-elect=maybe"]).unwrap_err();
        assert!(err.use_stderr());
    }

    #[test]
    fn test_malformed_numbers_are_rejected() {
        assert!(Cli::try_parse_from(["workflow-manager", "--lease-duration-secs=soon"]).is_err());
        assert!(Cli::try_parse_from(["workflow-manager", "--log-format=xml"]).is_err());
        assert!(Cli::try_parse_from(["workflow-manager", "--unknown-flag"]).is_err());
    }

    #[test]
    fn test_unset_flags_stay_unset() {
        let cli = Cli::try_parse_from(["workflow-manager"]).unwrap();
        assert!(cli.listen.is_none());
        assert!(cli.leader_elect.is_none());
    }
}
