//! Leader election lease stored as a `coordination.k8s.io/v1` Lease.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use tokio::time::Instant;

use crate::manager::leader::{LeaseBackend, LeaseError};

/// Lease backend talking to the Kubernetes API.
///
/// Writes use the object's resource version, so two replicas racing for the
/// same lease cannot both win: the loser gets a 409 and reports "not held".
///
/// Expiry of another holder's lease is measured on the local clock from the
/// moment its record was last seen to change, never from the `renewTime`
/// written by the other replica.
pub struct KubeLeaseBackend {
    api: Api<Lease>,
    namespace: String,
    name: String,
    observed: Mutex<Option<Observation>>,
}

impl KubeLeaseBackend {
    pub fn new(client: kube::Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            name: name.to_string(),
            observed: Mutex::new(None),
        }
    }

    fn is_expired(&self, spec: &LeaseSpec) -> Result<bool, LeaseError> {
        let mut observed = self
            .observed
            .lock()
            .map_err(|_| LeaseError::Unavailable("lease observation lock poisoned".into()))?;
        Ok(observe(&mut observed, spec, Instant::now()))
    }

    async fn write(&self, lease: &Lease, create: bool) -> Result<bool, LeaseError> {
        let pp = PostParams::default();
        let result = if create {
            self.api.create(&pp, lease).await
        } else {
            self.api.replace(&self.name, &pp, lease).await
        };
        match result {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl LeaseBackend for KubeLeaseBackend {
    async fn try_acquire_or_renew(&self, holder: &str, lease_duration: Duration) -> Result<bool, LeaseError> {
        let now = Utc::now();
        let duration_secs = lease_duration_secs(lease_duration);

        let Some(mut lease) = self.api.get_opt(&self.name).await? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(self.name.clone()),
                    namespace: Some(self.namespace.clone()),
                    ..Default::default()
                },
                spec: Some(LeaseSpec {
                    holder_identity: Some(holder.to_string()),
                    lease_duration_seconds: Some(duration_secs),
                    acquire_time: Some(MicroTime(now)),
                    renew_time: Some(MicroTime(now)),
                    lease_transitions: Some(0),
                    ..Default::default()
                }),
            };
            return self.write(&lease, true).await;
        };

        let spec = lease.spec.get_or_insert_with(LeaseSpec::default);
        let expired = self.is_expired(spec)?;
        match claim(spec, holder, duration_secs, now, expired) {
            Claim::HeldByOther => Ok(false),
            Claim::Write => self.write(&lease, false).await,
        }
    }

    async fn release(&self, holder: &str) -> Result<(), LeaseError> {
        let Some(mut lease) = self.api.get_opt(&self.name).await? else {
            return Ok(());
        };
        let spec = lease.spec.get_or_insert_with(LeaseSpec::default);
        if spec.holder_identity.as_deref() != Some(holder) {
            return Ok(());
        }
        let now = MicroTime(Utc::now());
        spec.holder_identity = None;
        spec.lease_duration_seconds = Some(1);
        spec.acquire_time = Some(now.clone());
        spec.renew_time = Some(now);
        if self.write(&lease, false).await? {
            Ok(())
        } else {
            Err(LeaseError::Conflict(self.describe()))
        }
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Claim {
    HeldByOther,
    Write,
}

/// Update `spec` in place for `holder` unless someone else holds a live lease.
fn claim(spec: &mut LeaseSpec, holder: &str, duration_secs: i32, now: DateTime<Utc>, expired: bool) -> Claim {
    let current = spec.holder_identity.as_deref().filter(|h| !h.is_empty());
    let ours = current == Some(holder);

    if !ours && current.is_some() && !expired {
        return Claim::HeldByOther;
    }

    if !ours {
        if current.is_some() {
            spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
        }
        spec.holder_identity = Some(holder.to_string());
        spec.acquire_time = Some(MicroTime(now));
    }
    spec.renew_time = Some(MicroTime(now));
    spec.lease_duration_seconds = Some(duration_secs);
    Claim::Write
}

/// The parts of a lease record that change on every write by its holder.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    holder: Option<String>,
    renew_time: Option<DateTime<Utc>>,
    duration_secs: Option<i32>,
    transitions: Option<i32>,
}

impl Record {
    fn of(spec: &LeaseSpec) -> Self {
        Self {
            holder: spec.holder_identity.clone(),
            renew_time: spec.renew_time.as_ref().map(|t| t.0),
            duration_secs: spec.lease_duration_seconds,
            transitions: spec.lease_transitions,
        }
    }
}

#[derive(Debug)]
struct Observation {
    record: Record,
    seen_at: Instant,
}

/// Note `spec` as seen at local time `now`; true once its record has stayed
/// unchanged for longer than its lease duration.
fn observe(observed: &mut Option<Observation>, spec: &LeaseSpec, now: Instant) -> bool {
    let record = Record::of(spec);
    let Some(duration) = record.duration_secs else {
        return true;
    };
    let seen_at = match observed {
        Some(last) if last.record == record => last.seen_at,
        _ => {
            *observed = Some(Observation { record, seen_at: now });
            now
        }
    };
    now.duration_since(seen_at) > Duration::from_secs(u64::try_from(duration).unwrap_or(0))
}

fn lease_duration_secs(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs().max(1)).unwrap_or(i32::MAX)
}
