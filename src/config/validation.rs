//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (clap and serde handle syntax)
//! - Kubernetes naming rules for namespaces and the lease name
//! - Listener conflicts between the metrics, probe and API endpoints
//! - Leader election timing relationships
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProcessConfig → Result<(), Vec<ValidationError>>

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::config::schema::ProcessConfig;

/// Renewal attempts are jittered up to this factor of the retry period.
pub const JITTER_FACTOR: f64 = 1.2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidNamespace { field: &'static str, value: String },
    InvalidLeaderElectionId(String),
    AddressConflict { first: &'static str, second: &'static str, addr: SocketAddr },
    InvalidLeaseTiming(String),
    ZeroTimeout(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidNamespace { field, value } => {
                write!(f, "{} {:?} is not a valid DNS-1123 label", field, value)
            }
            ValidationError::InvalidLeaderElectionId(id) => {
                write!(f, "leader election id {:?} is not a valid DNS-1123 subdomain", id)
            }
            ValidationError::AddressConflict { first, second, addr } => {
                write!(f, "{} and {} both bind {}", first, second, addr)
            }
            ValidationError::InvalidLeaseTiming(reason) => write!(f, "leader election timing: {}", reason),
            ValidationError::ZeroTimeout(field) => write!(f, "{} must be greater than zero", field),
        }
    }
}

pub fn validate_config(config: &ProcessConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_dns1123_label(&config.namespace) {
        errors.push(ValidationError::InvalidNamespace {
            field: "namespace",
            value: config.namespace.clone(),
        });
    }

    let le = &config.leader_election;
    if !is_dns1123_label(&le.namespace) {
        errors.push(ValidationError::InvalidNamespace {
            field: "leader election namespace",
            value: le.namespace.clone(),
        });
    }
    if !is_dns1123_subdomain(&le.id) {
        errors.push(ValidationError::InvalidLeaderElectionId(le.id.clone()));
    }

    if le.retry_period.is_zero() {
        errors.push(ValidationError::InvalidLeaseTiming("retry period must be greater than zero".into()));
    } else if le.renew_deadline <= le.retry_period.mul_f64(JITTER_FACTOR) {
        errors.push(ValidationError::InvalidLeaseTiming(format!(
            "renew deadline {:?} must exceed {} x retry period {:?}",
            le.renew_deadline, JITTER_FACTOR, le.retry_period
        )));
    }
    if le.lease_duration <= le.renew_deadline {
        errors.push(ValidationError::InvalidLeaseTiming(format!(
            "lease duration {:?} must exceed renew deadline {:?}",
            le.lease_duration, le.renew_deadline
        )));
    }

    if config.graceful_shutdown_timeout == Duration::ZERO {
        errors.push(ValidationError::ZeroTimeout("graceful shutdown timeout"));
    }
    if config.request_timeout == Duration::ZERO {
        errors.push(ValidationError::ZeroTimeout("request timeout"));
    }

    let endpoints = [
        ("metrics-bind-address", config.metrics_address.socket_addr()),
        ("health-probe-bind-address", config.health_probe_address.socket_addr()),
        ("listen", Some(config.listen_address)),
    ];
    for (i, (first, a)) in endpoints.iter().enumerate() {
        for (second, b) in endpoints.iter().skip(i + 1) {
            if let (Some(a), Some(b)) = (a, b) {
                // Port 0 asks the OS for a fresh port, so it never collides.
                if a.port() != 0 && conflicts(a, b) {
                    errors.push(ValidationError::AddressConflict { first, second, addr: *a });
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn conflicts(a: &SocketAddr, b: &SocketAddr) -> bool {
    a.port() == b.port() && (a.ip() == b.ip() || a.ip().is_unspecified() || b.ip().is_unspecified())
}

fn is_dns1123_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes.iter().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
}

fn is_dns1123_subdomain(value: &str) -> bool {
    !value.is_empty() && value.len() <= 253 && value.split('.').all(is_dns1123_label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BindAddress;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ProcessConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = ProcessConfig::default();
        config.namespace = "Dev_Namespace".into();
        config.leader_election.namespace = "ok".into();
        config.leader_election.id = "bad..id".into();
        config.request_timeout = Duration::ZERO;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(matches!(errors[0], ValidationError::InvalidNamespace { field: "namespace", .. }));
        assert!(matches!(errors[1], ValidationError::InvalidLeaderElectionId(_)));
        assert_eq!(errors[2], ValidationError::ZeroTimeout("request timeout"));
    }

    #[test]
    fn test_default_lease_id_is_a_subdomain() {
        assert!(is_dns1123_subdomain("3826945b.tongjicad"));
        assert!(!is_dns1123_subdomain("-lead.er"));
        assert!(!is_dns1123_label(&"a".repeat(64)));
    }

    #[test]
    fn test_unspecified_ip_conflicts_with_loopback() {
        let mut config = ProcessConfig::default();
        config.listen_address = "127.0.0.1:8081".parse().unwrap();
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(
            errors[0],
            ValidationError::AddressConflict { first: "health-probe-bind-address", second: "listen", .. }
        ));
    }

    #[test]
    fn test_disabled_and_ephemeral_endpoints_never_conflict() {
        let mut config = ProcessConfig::default();
        config.metrics_address = BindAddress::Disabled;
        config.health_probe_address = BindAddress::Socket("127.0.0.1:0".parse().unwrap());
        config.listen_address = "127.0.0.1:0".parse().unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_lease_timing_relationships() {
        let mut config = ProcessConfig::default();
        config.leader_election.lease_duration = Duration::from_secs(10);
        config.leader_election.renew_deadline = Duration::from_secs(10);
        config.leader_election.retry_period = Duration::from_secs(9);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, ValidationError::InvalidLeaseTiming(_))));
    }
}
