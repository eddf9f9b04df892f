//! Shared utilities for the integration tests.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kube::api::DynamicObject;
use tokio_util::sync::CancellationToken;

use workflow_manager::config::{BindAddress, LeaderElectionConfig, ProcessConfig};
use workflow_manager::k8s::scheme::workflow_resource;
use workflow_manager::k8s::{
    BootstrapError, Bootstrapped, ClusterClient, ClusterConnection, ClusterProvider, ConnectionError, Scheme,
    SchemeError, WorkflowCache,
};
use workflow_manager::manager::{LeaseBackend, LeaseError, Runnable, RunnableError};

/// Reserve a free local port. The listener is dropped before returning.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn local(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Config with every endpoint on a fresh local port and short timings.
pub fn test_config(namespace: &str) -> ProcessConfig {
    ProcessConfig {
        metrics_address: BindAddress::Socket(local(free_port())),
        health_probe_address: BindAddress::Socket(local(free_port())),
        listen_address: local(free_port()),
        namespace: namespace.to_string(),
        leader_election: LeaderElectionConfig {
            enabled: false,
            namespace: namespace.to_string(),
            lease_duration: Duration::from_secs(2),
            renew_deadline: Duration::from_secs(1),
            retry_period: Duration::from_millis(200),
            ..Default::default()
        },
        graceful_shutdown_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub fn probe_url(config: &ProcessConfig, path: &str) -> String {
    let addr = config.health_probe_address.socket_addr().unwrap();
    format!("http://{}{}", addr, path)
}

pub fn api_url(config: &ProcessConfig, path: &str) -> String {
    format!("http://{}{}", config.listen_address, path)
}

/// Poll `url` until it answers, returning the status code.
pub async fn wait_for(url: &str) -> u16 {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    for _ in 0..100 {
        if let Ok(resp) = client.get(url).send().await {
            return resp.status().as_u16();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} never answered", url);
}

/// Poll `url` until it returns `status`.
#[allow(dead_code)]
pub async fn wait_for_status(url: &str, status: u16) {
    for _ in 0..100 {
        if wait_for(url).await == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} never returned {}", url, status);
}

/// True if something accepts connections on `addr`.
#[allow(dead_code)]
pub async fn is_listening(addr: SocketAddr) -> bool {
    tokio::net::TcpStream::connect(addr).await.is_ok()
}

/// Cluster provider that never talks to a real API server.
#[derive(Default)]
pub struct FakeProvider {
    pub unreachable: bool,
    pub workflows_not_served: bool,
    pub workflows: Vec<DynamicObject>,
    pub lease: Arc<FakeLease>,
}

#[async_trait]
impl ClusterProvider for FakeProvider {
    async fn connect(&self) -> Result<ClusterConnection, ConnectionError> {
        if self.unreachable {
            return Err(ConnectionError::Unreachable {
                endpoint: "https://10.0.0.1:6443".to_string(),
                source: "connection refused".into(),
            });
        }
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        Ok(ClusterConnection::from_config(config))
    }

    fn lease_backend(
        &self,
        _connection: &ClusterConnection,
        _namespace: &str,
        _name: &str,
    ) -> Result<Arc<dyn LeaseBackend>, ConnectionError> {
        Ok(self.lease.clone())
    }

    async fn bootstrap(
        &self,
        connection: &ClusterConnection,
        namespace: &str,
        scheme: Arc<Scheme>,
    ) -> Result<Bootstrapped, BootstrapError> {
        if self.workflows_not_served {
            return Err(SchemeError::NotServed {
                api_version: "argoproj.io/v1alpha1".to_string(),
                plural: "workflows".to_string(),
            }
            .into());
        }
        let client = connection.client()?;
        let cache = WorkflowCache::seeded(workflow_resource(), namespace, self.workflows.clone());
        Ok(Bootstrapped {
            client: ClusterClient::new(client, namespace, scheme, cache),
            informer: None,
        })
    }
}

/// In-memory lease.
#[derive(Default)]
pub struct FakeLease {
    holder: Mutex<Option<String>>,
    pub fail: AtomicBool,
    pub releases: AtomicUsize,
}

impl FakeLease {
    /// A lease another replica holds and never gives up.
    #[allow(dead_code)]
    pub fn held_by_other() -> Self {
        Self {
            holder: Mutex::new(Some("other-replica".to_string())),
            ..Default::default()
        }
    }

    #[allow(dead_code)]
    pub fn holder(&self) -> Option<String> {
        self.holder.lock().unwrap().clone()
    }
}

#[async_trait]
impl LeaseBackend for FakeLease {
    async fn try_acquire_or_renew(&self, holder: &str, _lease_duration: Duration) -> Result<bool, LeaseError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LeaseError::Unavailable("lease store offline".to_string()));
        }
        let mut current = self.holder.lock().unwrap();
        match current.as_deref() {
            Some(other) if other != holder => Ok(false),
            _ => {
                *current = Some(holder.to_string());
                Ok(true)
            }
        }
    }

    async fn release(&self, holder: &str) -> Result<(), LeaseError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let mut current = self.holder.lock().unwrap();
        if current.as_deref() == Some(holder) {
            *current = None;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "dev/3826945b.tongjicad".to_string()
    }
}

/// Runnable that records whether it started and optionally fails.
pub struct Probe {
    pub name: &'static str,
    pub leader: bool,
    pub fail_after: Option<Duration>,
    pub ignores_shutdown: bool,
    pub started: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl Probe {
    pub fn new(name: &'static str, leader: bool) -> Self {
        Self {
            name,
            leader,
            fail_after: None,
            ignores_shutdown: false,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing(name: &'static str, after: Duration) -> Self {
        Self {
            fail_after: Some(after),
            ..Self::new(name, false)
        }
    }

    /// Leader runnable that never returns, cancelled or not.
    pub fn stubborn(name: &'static str) -> Self {
        Self {
            ignores_shutdown: true,
            ..Self::new(name, true)
        }
    }
}

#[async_trait]
impl Runnable for Probe {
    fn name(&self) -> &str {
        self.name
    }

    fn needs_leader_election(&self) -> bool {
        self.leader
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<(), RunnableError> {
        self.started.store(true, Ordering::SeqCst);
        match self.fail_after {
            Some(after) => {
                tokio::time::sleep(after).await;
                Err(format!("{} gave up", self.name).into())
            }
            None if self.ignores_shutdown => {
                std::future::pending::<()>().await;
                Ok(())
            }
            None => {
                shutdown.cancelled().await;
                Ok(())
            }
        }
    }
}
