//! Mock object store for unit testing
//!
//! `MockClusterClient` keeps objects in memory and behaves like a minimal API
//! server: it assigns resourceVersions, bumps `metadata.generation` when a
//! spec changes, rejects stale updates with
//! `Conflict`, keeps status untouched on spec updates and records every
//! write so tests can assert on side effects. Individual operations can be
//! made to fail with `fail_on`.

use crate::cluster_trait::{ObjectCreator, ObjectGetter, ObjectUpdater, StatusUpdater};
use crate::error::ClientError;
use crds::CSISnapshotController;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::Resource;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Resource kinds served by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// apiextensions.k8s.io/v1 CustomResourceDefinition
    CustomResourceDefinition,
    /// apps/v1 Deployment
    Deployment,
    /// The operator config object
    CSISnapshotController,
}

/// Verbs recorded by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Read by name
    Get,
    /// Create
    Create,
    /// Full replace
    Update,
    /// Status subresource replace
    UpdateStatus,
}

/// A write observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Kind written
    pub kind: ObjectKind,
    /// Verb used
    pub verb: Verb,
    /// `namespace/name`, or just `name` for cluster-scoped objects
    pub key: String,
}

fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock object store for testing
#[derive(Clone, Default)]
pub struct MockClusterClient {
    crds: Arc<Mutex<BTreeMap<String, CustomResourceDefinition>>>,
    deployments: Arc<Mutex<BTreeMap<String, Deployment>>>,
    configs: Arc<Mutex<BTreeMap<String, CSISnapshotController>>>,
    failures: Arc<Mutex<HashMap<(ObjectKind, Verb), ClientError>>>,
    writes: Arc<Mutex<Vec<WriteRecord>>>,
    // Counter for generating resourceVersions
    next_resource_version: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for MockClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterClient")
            .field("crds", &lock(&self.crds).len())
            .field("deployments", &lock(&self.deployments).len())
            .field("configs", &lock(&self.configs).len())
            .finish_non_exhaustive()
    }
}

impl MockClusterClient {
    /// Create an empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a CRD (for test setup; not recorded as a write)
    pub fn add_crd(&self, mut crd: CustomResourceDefinition) {
        self.stamp(&mut crd);
        let key = object_key(None, crd.meta().name.as_deref().unwrap_or_default());
        lock(&self.crds).insert(key, crd);
    }

    /// Seed or overwrite a Deployment, as an external writer would (not
    /// recorded as a write). Overwriting a different spec bumps the generation.
    pub fn add_deployment(&self, mut deployment: Deployment) {
        self.stamp(&mut deployment);
        let key = object_key(
            deployment.metadata.namespace.as_deref(),
            deployment.metadata.name.as_deref().unwrap_or_default(),
        );
        let mut deployments = lock(&self.deployments);
        if let Some(stored) = deployments.get(&key) {
            deployment.metadata.generation =
                next_generation(stored.metadata.generation, stored.spec != deployment.spec);
        }
        deployments.insert(key, deployment);
    }

    /// Seed the operator config object (for test setup; not recorded as a write)
    pub fn add_config(&self, mut config: CSISnapshotController) {
        self.stamp(&mut config);
        let key = object_key(None, config.metadata.name.as_deref().unwrap_or_default());
        lock(&self.configs).insert(key, config);
    }

    /// Make every future `verb` on `kind` fail with `error` until cleared
    pub fn fail_on(&self, kind: ObjectKind, verb: Verb, error: ClientError) {
        lock(&self.failures).insert((kind, verb), error);
    }

    /// Remove an injected failure
    pub fn clear_failure(&self, kind: ObjectKind, verb: Verb) {
        lock(&self.failures).remove(&(kind, verb));
    }

    /// Bump the resourceVersion of the stored config, as a concurrent writer would
    pub fn touch_config(&self, name: &str) {
        let rv = self.next_resource_version();
        if let Some(config) = lock(&self.configs).get_mut(name) {
            config.metadata.resource_version = Some(rv);
        }
    }

    /// All writes recorded so far
    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.writes).clone()
    }

    /// Number of writes recorded so far
    pub fn write_count(&self) -> usize {
        lock(&self.writes).len()
    }

    /// Forget recorded writes
    pub fn reset_writes(&self) {
        lock(&self.writes).clear();
    }

    /// Stored CRD, if any
    pub fn crd(&self, name: &str) -> Option<CustomResourceDefinition> {
        lock(&self.crds).get(name).cloned()
    }

    /// Stored Deployment, if any
    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        lock(&self.deployments)
            .get(&object_key(Some(namespace), name))
            .cloned()
    }

    /// Stored config object, if any
    pub fn config(&self, name: &str) -> Option<CSISnapshotController> {
        lock(&self.configs).get(name).cloned()
    }

    /// Number of stored CRDs
    pub fn crd_count(&self) -> usize {
        lock(&self.crds).len()
    }

    /// Number of stored Deployments
    pub fn deployment_count(&self) -> usize {
        lock(&self.deployments).len()
    }

    fn next_resource_version(&self) -> String {
        let mut rv = lock(&self.next_resource_version);
        *rv += 1;
        rv.to_string()
    }

    fn stamp<K: Resource>(&self, object: &mut K) {
        object.meta_mut().resource_version = Some(self.next_resource_version());
    }

    fn check_failure(&self, kind: ObjectKind, verb: Verb) -> Result<(), ClientError> {
        match lock(&self.failures).get(&(kind, verb)) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn record(&self, kind: ObjectKind, verb: Verb, key: String) {
        lock(&self.writes).push(WriteRecord { kind, verb, key });
    }

    fn get_from<K: Clone>(
        &self,
        store: &Mutex<BTreeMap<String, K>>,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<K, ClientError> {
        self.check_failure(kind, Verb::Get)?;
        let key = object_key(namespace, name);
        lock(store)
            .get(&key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("{kind:?} {key}")))
    }

    fn create_in<K: Resource + Clone>(
        &self,
        store: &Mutex<BTreeMap<String, K>>,
        kind: ObjectKind,
        object: &K,
    ) -> Result<K, ClientError> {
        self.check_failure(kind, Verb::Create)?;
        let key = key_of(object)?;
        let mut objects = lock(store);
        if objects.contains_key(&key) {
            return Err(ClientError::AlreadyExists(format!("{kind:?} {key}")));
        }
        let mut created = object.clone();
        self.stamp(&mut created);
        created.meta_mut().generation = Some(1);
        objects.insert(key.clone(), created.clone());
        drop(objects);
        self.record(kind, Verb::Create, key);
        Ok(created)
    }

    /// Replaces the stored object with `merge(stored, incoming)`, which decides
    /// which server-managed fields (such as status) survive the write.
    fn update_in<K: Resource + Clone>(
        &self,
        store: &Mutex<BTreeMap<String, K>>,
        kind: ObjectKind,
        verb: Verb,
        object: &K,
        merge: impl FnOnce(&K, &K) -> K,
    ) -> Result<K, ClientError> {
        self.check_failure(kind, verb)?;
        let key = key_of(object)?;
        let mut objects = lock(store);
        let stored = objects
            .get(&key)
            .ok_or_else(|| ClientError::NotFound(format!("{kind:?} {key}")))?;
        if let Some(rv) = &object.meta().resource_version
            && stored.meta().resource_version.as_ref() != Some(rv)
        {
            return Err(ClientError::Conflict(format!(
                "{kind:?} {key}: the object has been modified"
            )));
        }
        let mut updated = merge(stored, object);
        self.stamp(&mut updated);
        objects.insert(key.clone(), updated.clone());
        drop(objects);
        self.record(kind, verb, key);
        Ok(updated)
    }
}

/// Generation after a write: bumped only when the spec changed.
fn next_generation(stored: Option<i64>, spec_changed: bool) -> Option<i64> {
    let current = stored.unwrap_or(1);
    Some(if spec_changed { current + 1 } else { current })
}

fn key_of<K: Resource>(object: &K) -> Result<String, ClientError> {
    let meta = object.meta();
    let name = meta
        .name
        .as_deref()
        .ok_or_else(|| ClientError::InvalidRequest("object has no metadata.name".to_string()))?;
    Ok(object_key(meta.namespace.as_deref(), name))
}

#[async_trait::async_trait]
impl ObjectGetter<CustomResourceDefinition> for MockClusterClient {
    async fn get(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<CustomResourceDefinition, ClientError> {
        self.get_from(&self.crds, ObjectKind::CustomResourceDefinition, namespace, name)
    }
}

#[async_trait::async_trait]
impl ObjectCreator<CustomResourceDefinition> for MockClusterClient {
    async fn create(
        &self,
        object: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, ClientError> {
        self.create_in(&self.crds, ObjectKind::CustomResourceDefinition, object)
    }
}

#[async_trait::async_trait]
impl ObjectUpdater<CustomResourceDefinition> for MockClusterClient {
    async fn update(
        &self,
        object: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, ClientError> {
        self.update_in(
            &self.crds,
            ObjectKind::CustomResourceDefinition,
            Verb::Update,
            object,
            |stored, incoming| {
                let mut updated = incoming.clone();
                updated.metadata.generation =
                    next_generation(stored.metadata.generation, stored.spec != incoming.spec);
                updated.status = stored.status.clone();
                updated
            },
        )
    }
}

#[async_trait::async_trait]
impl ObjectGetter<Deployment> for MockClusterClient {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Deployment, ClientError> {
        self.get_from(&self.deployments, ObjectKind::Deployment, namespace, name)
    }
}

#[async_trait::async_trait]
impl ObjectCreator<Deployment> for MockClusterClient {
    async fn create(&self, object: &Deployment) -> Result<Deployment, ClientError> {
        self.create_in(&self.deployments, ObjectKind::Deployment, object)
    }
}

#[async_trait::async_trait]
impl ObjectUpdater<Deployment> for MockClusterClient {
    async fn update(&self, object: &Deployment) -> Result<Deployment, ClientError> {
        self.update_in(
            &self.deployments,
            ObjectKind::Deployment,
            Verb::Update,
            object,
            |stored, incoming| {
                let mut updated = incoming.clone();
                updated.metadata.generation =
                    next_generation(stored.metadata.generation, stored.spec != incoming.spec);
                updated.status = stored.status.clone();
                updated
            },
        )
    }
}

#[async_trait::async_trait]
impl ObjectGetter<CSISnapshotController> for MockClusterClient {
    async fn get(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<CSISnapshotController, ClientError> {
        self.get_from(&self.configs, ObjectKind::CSISnapshotController, namespace, name)
    }
}

#[async_trait::async_trait]
impl StatusUpdater<CSISnapshotController> for MockClusterClient {
    async fn update_status(
        &self,
        object: &CSISnapshotController,
    ) -> Result<CSISnapshotController, ClientError> {
        self.update_in(
            &self.configs,
            ObjectKind::CSISnapshotController,
            Verb::UpdateStatus,
            object,
            |stored, incoming| {
                let mut updated = stored.clone();
                updated.status = incoming.status.clone();
                updated
            },
        )
    }
}
