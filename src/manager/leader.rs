//! Lease-based leader election.
//!
//! # Responsibilities
//! - Acquire the lease, retrying until elected or cancelled
//! - Renew it for as long as the manager runs
//! - Release it on the way out so a standby can take over without waiting
//!
//! # Design Decisions
//! - The lease store sits behind `LeaseBackend`; the Kubernetes Lease
//!   implementation lives in `k8s::lease`
//! - Losing the lease is fatal: the manager shuts down rather than run leader
//!   work without it

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::validation::JITTER_FACTOR;
use crate::config::LeaderElectionConfig;
use crate::manager::ManagerError;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease request failed: {0}")]
    Api(#[from] kube::Error),

    #[error("lease {0} was modified concurrently")]
    Conflict(String),

    #[error("lease store unavailable: {0}")]
    Unavailable(String),
}

/// Storage for a single named lease.
#[async_trait]
pub trait LeaseBackend: Send + Sync + 'static {
    /// Take the lease for `holder`, or renew it if `holder` already has it.
    ///
    /// Returns `Ok(false)` while someone else holds a live lease.
    async fn try_acquire_or_renew(&self, holder: &str, lease_duration: Duration) -> Result<bool, LeaseError>;

    /// Give the lease up if `holder` still has it.
    async fn release(&self, holder: &str) -> Result<(), LeaseError>;

    /// Human-readable lease location, e.g. `argo/3826945b.tongjicad`.
    fn describe(&self) -> String;
}

/// Runs the election protocol for one replica.
pub struct LeaderElector {
    backend: Arc<dyn LeaseBackend>,
    identity: String,
    config: LeaderElectionConfig,
}

impl LeaderElector {
    pub fn new(backend: Arc<dyn LeaseBackend>, config: LeaderElectionConfig) -> Self {
        Self {
            backend,
            identity: default_identity(),
            config,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn lease(&self) -> String {
        self.backend.describe()
    }

    /// Block until the lease is held. Returns `false` if cancelled first.
    pub async fn acquire(&self, shutdown: &CancellationToken) -> bool {
        tracing::info!(lease = %self.lease(), identity = %self.identity, "Attempting to acquire leader lease");

        loop {
            if shutdown.is_cancelled() {
                return false;
            }

            let attempt = tokio::select! {
                _ = shutdown.cancelled() => return false,
                result = self.backend.try_acquire_or_renew(&self.identity, self.config.lease_duration) => result,
            };

            match attempt {
                Ok(true) => {
                    metrics::record_lease_attempt("acquired");
                    tracing::info!(lease = %self.lease(), identity = %self.identity, "Acquired leader lease");
                    return true;
                }
                Ok(false) => {
                    metrics::record_lease_attempt("held");
                    tracing::debug!(lease = %self.lease(), "Lease held by another replica");
                }
                Err(e) => {
                    metrics::record_lease_attempt("error");
                    tracing::warn!(lease = %self.lease(), error = %e, "Failed to acquire leader lease");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(jittered(self.config.retry_period)) => {}
            }
        }
    }

    /// Keep renewing until cancelled. Fails once no renewal has succeeded
    /// within the renew deadline, or another replica took the lease.
    pub async fn hold(&self, shutdown: &CancellationToken) -> Result<(), ManagerError> {
        let mut last_renewed = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }

            let remaining = self.config.renew_deadline.saturating_sub(last_renewed.elapsed());
            let renewal = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                result = tokio::time::timeout(
                    remaining,
                    self.backend.try_acquire_or_renew(&self.identity, self.config.lease_duration),
                ) => result,
            };

            match renewal {
                Ok(Ok(true)) => {
                    metrics::record_lease_attempt("renewed");
                    last_renewed = Instant::now();
                }
                Ok(Ok(false)) => {
                    metrics::record_lease_attempt("lost");
                    tracing::error!(lease = %self.lease(), "Leader lease taken by another replica");
                    return Err(self.lost());
                }
                Ok(Err(e)) => {
                    metrics::record_lease_attempt("error");
                    tracing::warn!(lease = %self.lease(), error = %e, "Failed to renew leader lease");
                }
                Err(_) => {
                    metrics::record_lease_attempt("error");
                    tracing::warn!(lease = %self.lease(), "Leader lease renewal timed out");
                }
            }

            if last_renewed.elapsed() >= self.config.renew_deadline {
                tracing::error!(
                    lease = %self.lease(),
                    deadline = ?self.config.renew_deadline,
                    "Leader lease not renewed within deadline"
                );
                return Err(self.lost());
            }
        }
    }

    /// Release the lease. Failures only delay the next leader.
    pub async fn release(&self) -> Result<(), LeaseError> {
        self.backend.release(&self.identity).await?;
        metrics::record_lease_attempt("released");
        tracing::info!(lease = %self.lease(), identity = %self.identity, "Released leader lease");
        Ok(())
    }

    fn lost(&self) -> ManagerError {
        ManagerError::LeadershipLost { lease: self.lease() }
    }
}

/// `<hostname>_<uuid>`, unique per process even when pods share a hostname.
fn default_identity() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "workflow-manager".to_string());
    format!("{}_{}", host, Uuid::new_v4())
}

/// `period` stretched by a random factor in `[1, JITTER_FACTOR]`.
fn jittered(period: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(1.0..=JITTER_FACTOR);
    period.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory lease shared by several electors.
    #[derive(Default)]
    struct MemoryLease {
        holder: Mutex<Option<String>>,
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LeaseBackend for MemoryLease {
        async fn try_acquire_or_renew(&self, holder: &str, _: Duration) -> Result<bool, LeaseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(LeaseError::Unavailable("offline".into()));
            }
            let mut current = self.holder.lock().unwrap();
            match current.as_deref() {
                Some(h) if h != holder => Ok(false),
                _ => {
                    *current = Some(holder.to_string());
                    Ok(true)
                }
            }
        }

        async fn release(&self, holder: &str) -> Result<(), LeaseError> {
            let mut current = self.holder.lock().unwrap();
            if current.as_deref() == Some(holder) {
                *current = None;
            }
            Ok(())
        }

        fn describe(&self) -> String {
            "test/lease".to_string()
        }
    }

    fn config() -> LeaderElectionConfig {
        LeaderElectionConfig {
            enabled: true,
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_identity_format() {
        let id = default_identity();
        let (_, suffix) = id.rsplit_once('_').unwrap();
        assert!(Uuid::parse_str(suffix).is_ok());
        assert_ne!(default_identity(), id);
    }

    #[test]
    fn test_jitter_bounds() {
        let period = Duration::from_secs(2);
        for _ in 0..100 {
            let d = jittered(period);
            assert!(d >= period);
            assert!(d <= period.mul_f64(JITTER_FACTOR));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_elector_wins() {
        let lease = Arc::new(MemoryLease::default());
        let first = LeaderElector::new(lease.clone(), config());
        let second = LeaderElector::new(lease.clone(), config());
        let token = CancellationToken::new();

        assert!(first.acquire(&token).await);

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            cancel.cancel();
        });
        assert!(!second.acquire(&token).await);
        assert!(lease.calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(lease.holder.lock().unwrap().as_deref(), Some(first.identity()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_standby_takes_over_after_release() {
        let lease = Arc::new(MemoryLease::default());
        let first = LeaderElector::new(lease.clone(), config());
        let second = LeaderElector::new(lease.clone(), config());
        let token = CancellationToken::new();

        assert!(first.acquire(&token).await);
        first.release().await.unwrap();
        assert!(second.acquire(&token).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_fails_after_renew_deadline() {
        let lease = Arc::new(MemoryLease::default());
        let elector = LeaderElector::new(lease.clone(), config());
        let token = CancellationToken::new();
        assert!(elector.acquire(&token).await);

        lease.failing.store(true, Ordering::SeqCst);
        let started = Instant::now();
        let err = elector.hold(&token).await.unwrap_err();
        assert!(matches!(err, ManagerError::LeadershipLost { ref lease } if lease == "test/lease"));
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_returns_ok_on_cancel() {
        let lease = Arc::new(MemoryLease::default());
        let elector = LeaderElector::new(lease.clone(), config());
        let token = CancellationToken::new();
        assert!(elector.acquire(&token).await);

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            cancel.cancel();
        });
        assert!(elector.hold(&token).await.is_ok());
    }
}
