//! Narrow per-capability object store traits
//!
//! Each trait covers one verb for one resource kind, so a component only
//! depends on the capabilities it actually uses. The kube-backed
//! `KubeClusterClient` implements all of them; tests substitute the
//! in-memory `MockClusterClient`.

use crate::error::ClientError;

/// Reads a single object by namespace and name.
///
/// `namespace` is `None` for cluster-scoped kinds.
#[async_trait::async_trait]
pub trait ObjectGetter<K>: Send + Sync {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, ClientError>;
}

/// Creates an object. Namespace and name are taken from its metadata.
#[async_trait::async_trait]
pub trait ObjectCreator<K>: Send + Sync {
    async fn create(&self, object: &K) -> Result<K, ClientError>;
}

/// Replaces an existing object.
///
/// The object's `resourceVersion` acts as a precondition: a stale version
/// yields `ClientError::Conflict`.
#[async_trait::async_trait]
pub trait ObjectUpdater<K>: Send + Sync {
    async fn update(&self, object: &K) -> Result<K, ClientError>;
}

/// Writes the status subresource of an object, guarded by its
/// `resourceVersion`.
#[async_trait::async_trait]
pub trait StatusUpdater<K>: Send + Sync {
    async fn update_status(&self, object: &K) -> Result<K, ClientError>;
}

/// Get + create + update for one kind.
pub trait ObjectClient<K>: ObjectGetter<K> + ObjectCreator<K> + ObjectUpdater<K> {}

impl<K, T> ObjectClient<K> for T where T: ObjectGetter<K> + ObjectCreator<K> + ObjectUpdater<K> {}
