//! Shared workflow cache.
//!
//! A reflector store fed by a namespace-scoped watch. The store is read by the
//! workflow API; the watch runs as a manager runnable on every replica, so
//! standby replicas serve reads from a warm cache too.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::core::ApiResource;
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use tokio_util::sync::CancellationToken;

use crate::manager::{Runnable, RunnableError};

/// Read side of the workflow cache.
#[derive(Clone)]
pub struct WorkflowCache {
    store: Store<DynamicObject>,
    resource: ApiResource,
    namespace: Arc<str>,
    synced: Arc<AtomicBool>,
}

impl WorkflowCache {
    /// Create the cache and the informer that fills it.
    pub fn new(api: Api<DynamicObject>, resource: ApiResource, namespace: &str) -> (Self, WorkflowInformer) {
        let writer = Writer::new(resource.clone());
        let synced = Arc::new(AtomicBool::new(false));
        let cache = Self {
            store: writer.as_reader(),
            resource,
            namespace: Arc::from(namespace),
            synced: synced.clone(),
        };
        let informer = WorkflowInformer {
            api,
            writer: Mutex::new(Some(writer)),
            synced,
        };
        (cache, informer)
    }

    /// A cache with no informer behind it. It stays empty and never syncs.
    pub fn detached(resource: ApiResource, namespace: &str) -> Self {
        let writer = Writer::new(resource.clone());
        Self {
            store: writer.as_reader(),
            resource,
            namespace: Arc::from(namespace),
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A synced cache holding a fixed set of workflows.
    pub fn seeded(resource: ApiResource, namespace: &str, objects: impl IntoIterator<Item = DynamicObject>) -> Self {
        let mut writer = Writer::new(resource.clone());
        for object in objects {
            writer.apply_watcher_event(&watcher::Event::Apply(object));
        }
        Self {
            store: writer.as_reader(),
            resource,
            namespace: Arc::from(namespace),
            synced: Arc::new(AtomicBool::new(true)),
        }
    }

    /// All cached workflows, ordered by name.
    pub fn list(&self) -> Vec<Arc<DynamicObject>> {
        let mut objects = self.store.state();
        objects.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        objects
    }

    pub fn get(&self, name: &str) -> Option<Arc<DynamicObject>> {
        let key = ObjectRef::new_with(name, self.resource.clone()).within(&self.namespace);
        self.store.get(&key)
    }

    /// True once the initial list has been loaded.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub fn resource(&self) -> &ApiResource {
        &self.resource
    }
}

/// Runnable that keeps a `WorkflowCache` up to date.
pub struct WorkflowInformer {
    api: Api<DynamicObject>,
    writer: Mutex<Option<Writer<DynamicObject>>>,
    synced: Arc<AtomicBool>,
}

#[async_trait]
impl Runnable for WorkflowInformer {
    fn name(&self) -> &str {
        "workflow-informer"
    }

    fn needs_leader_election(&self) -> bool {
        false
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<(), RunnableError> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| "workflow informer lock poisoned")?
            .take()
            .ok_or("workflow informer already started")?;

        let events = watcher(self.api.clone(), watcher::Config::default()).default_backoff();
        let stream = reflector::reflector(writer, events);
        futures_util::pin_mut!(stream);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(watcher::Event::InitDone)) => {
                        if !self.synced.swap(true, Ordering::AcqRel) {
                            tracing::info!("Workflow cache synced");
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => tracing::warn!(error = %e, "Workflow watch error; retrying"),
                    None => break,
                },
            }
        }

        tracing::info!("Workflow informer stopped");
        Ok(())
    }
}
