//! Kubernetes resource watchers.
//!
//! Every change notification on a watched kind collapses into the single work
//! key of the operator: the identity of the object that triggered it is
//! discarded, and the reconciler always recomputes the full desired state.
//! Leader-election lock updates are filtered out here because they carry no
//! desired-state change and arrive every few seconds.

use crate::error::ControllerError;
use crate::workqueue::{Enqueue, QueueKey};
use crds::CSISnapshotController;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Api, Client, Resource};
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use std::fmt;
use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Annotation set on objects used as leader-election locks.
pub const LEADER_ELECTION_ANNOTATION: &str = "control-plane.alpha.kubernetes.io/leader";

/// Watched resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The `CSISnapshotController` config object
    OperatorConfig,
    /// Any CustomResourceDefinition
    CustomResourceDefinition,
    /// A Deployment in the target namespace
    Deployment,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OperatorConfig => "CSISnapshotController",
            Self::CustomResourceDefinition => "CustomResourceDefinition",
            Self::Deployment => "Deployment",
        };
        f.write_str(name)
    }
}

/// Kind of change notification.
///
/// The watch stream does not distinguish adds from updates after the initial
/// list, so objects seen while listing count as `Added` and later applies as
/// `Updated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOp {
    /// Seen while listing
    Added,
    /// Changed after the initial list
    Updated,
    /// Removed
    Deleted,
}

/// True if the object is a leader-election lock.
pub fn is_leader_election_lock(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(LEADER_ELECTION_ANNOTATION))
}

/// Turns change notifications into queue adds of a fixed key.
pub struct EventHandler<K> {
    queue: Arc<dyn Enqueue<K>>,
    key: K,
}

impl<K: Debug> Debug for EventHandler<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<K: QueueKey> EventHandler<K> {
    /// Creates a handler that enqueues `key` on every relevant notification.
    pub fn new(queue: Arc<dyn Enqueue<K>>, key: K) -> Self {
        Self { queue, key }
    }

    /// Handles one notification. Returns whether the key was enqueued.
    ///
    /// Never blocks, and a panic while enqueueing is logged instead of
    /// unwinding into the watch task.
    pub fn handle(&self, kind: EventKind, op: EventOp, meta: &ObjectMeta) -> bool {
        let name = meta.name.as_deref().unwrap_or("<unknown>");

        if is_leader_election_lock(meta) {
            trace!("Ignoring leader-election lock {} {} ({:?})", kind, name, op);
            return false;
        }

        debug!("{} {} {:?}, queueing {:?}", kind, name, op, self.key);
        let result = catch_unwind(AssertUnwindSafe(|| self.queue.add(self.key.clone())));
        match result {
            Ok(()) => true,
            Err(panic) => {
                error!(
                    "Panic while handling {} {} event: {}",
                    kind,
                    name,
                    panic_message(panic.as_ref())
                );
                false
            }
        }
    }
}

/// Extracts the message of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Streams watch events of one kind into the handler until shutdown.
///
/// Watch errors are logged; the stream reconnects with the default backoff.
async fn watch_resource<R, K>(
    api: Api<R>,
    config: watcher::Config,
    kind: EventKind,
    handler: Arc<EventHandler<K>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ControllerError>
where
    R: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K: QueueKey,
{
    info!("Starting {} watcher", kind);

    let mut stream = watcher(api, config).default_backoff().boxed();

    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = stream.next() => event,
        };

        match event {
            Some(Ok(watcher::Event::Apply(obj))) => {
                handler.handle(kind, EventOp::Updated, obj.meta());
            }
            Some(Ok(watcher::Event::InitApply(obj))) => {
                handler.handle(kind, EventOp::Added, obj.meta());
            }
            Some(Ok(watcher::Event::Delete(obj))) => {
                handler.handle(kind, EventOp::Deleted, obj.meta());
            }
            Some(Ok(watcher::Event::Init)) => {
                debug!("{} watcher initializing", kind);
            }
            Some(Ok(watcher::Event::InitDone)) => {
                info!("{} watcher initialization complete", kind);
            }
            Some(Err(e)) => {
                warn!("{} watch error (will retry): {}", kind, e);
            }
            None => {
                return Err(ControllerError::Watch(format!("{kind} watch stream ended")));
            }
        }
    }

    info!("{} watcher stopped", kind);
    Ok(())
}

/// Watches the resources whose changes require a resync.
pub struct Watcher<K> {
    client: Client,
    handler: Arc<EventHandler<K>>,
    config_name: String,
    target_namespace: String,
}

impl<K: Debug> Debug for Watcher<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("handler", &self.handler)
            .field("config_name", &self.config_name)
            .field("target_namespace", &self.target_namespace)
            .finish_non_exhaustive()
    }
}

impl<K: QueueKey> Watcher<K> {
    /// Creates a new watcher instance.
    pub fn new(
        client: Client,
        handler: Arc<EventHandler<K>>,
        config_name: impl Into<String>,
        target_namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            handler,
            config_name: config_name.into(),
            target_namespace: target_namespace.into(),
        }
    }

    /// Watches the operator config object, listed by name only.
    pub async fn watch_operator_config(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ControllerError> {
        let api: Api<CSISnapshotController> = Api::all(self.client.clone());
        let config = watcher::Config::default().fields(&format!("metadata.name={}", self.config_name));
        watch_resource(api, config, EventKind::OperatorConfig, Arc::clone(&self.handler), shutdown).await
    }

    /// Watches all CRDs.
    pub async fn watch_crds(&self, shutdown: watch::Receiver<bool>) -> Result<(), ControllerError> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        watch_resource(
            api,
            watcher::Config::default(),
            EventKind::CustomResourceDefinition,
            Arc::clone(&self.handler),
            shutdown,
        )
        .await
    }

    /// Watches Deployments in the target namespace.
    pub async fn watch_deployments(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ControllerError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.target_namespace);
        watch_resource(
            api,
            watcher::Config::default(),
            EventKind::Deployment,
            Arc::clone(&self.handler),
            shutdown,
        )
        .await
    }
}
