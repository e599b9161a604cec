//! kube-rs backed object store client
//!
//! Thin I/O wrapper over `kube::Api`: no retries, no caching. Errors are
//! mapped into `ClientError` so callers can branch on NotFound/Conflict.

use crate::error::ClientError;
use crate::cluster_trait::{ObjectCreator, ObjectGetter, ObjectUpdater, StatusUpdater};
use crds::CSISnapshotController;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

/// Field manager recorded on every write.
pub const FIELD_MANAGER: &str = "csi-snapshot-controller-operator";

/// Object store client backed by a live Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    /// Wraps an already configured kube client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PostParams::default()
        }
    }

    fn deployments(&self, namespace: Option<&str>) -> Result<Api<Deployment>, ClientError> {
        let ns = namespace.ok_or_else(|| {
            ClientError::InvalidRequest("Deployment requires a namespace".to_string())
        })?;
        Ok(Api::namespaced(self.client.clone(), ns))
    }
}

fn required_name<K: kube::Resource>(object: &K) -> Result<String, ClientError> {
    object
        .meta()
        .name
        .clone()
        .ok_or_else(|| ClientError::InvalidRequest("object has no metadata.name".to_string()))
}

#[async_trait::async_trait]
impl ObjectGetter<CustomResourceDefinition> for KubeClusterClient {
    async fn get(
        &self,
        _namespace: Option<&str>,
        name: &str,
    ) -> Result<CustomResourceDefinition, ClientError> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }
}

#[async_trait::async_trait]
impl ObjectCreator<CustomResourceDefinition> for KubeClusterClient {
    async fn create(
        &self,
        object: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, ClientError> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        debug!("Creating CustomResourceDefinition {}", object.name_any());
        Ok(api.create(&Self::post_params(), object).await?)
    }
}

#[async_trait::async_trait]
impl ObjectUpdater<CustomResourceDefinition> for KubeClusterClient {
    async fn update(
        &self,
        object: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, ClientError> {
        let name = required_name(object)?;
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        debug!("Replacing CustomResourceDefinition {}", name);
        Ok(api.replace(&name, &Self::post_params(), object).await?)
    }
}

#[async_trait::async_trait]
impl ObjectGetter<Deployment> for KubeClusterClient {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Deployment, ClientError> {
        Ok(self.deployments(namespace)?.get(name).await?)
    }
}

#[async_trait::async_trait]
impl ObjectCreator<Deployment> for KubeClusterClient {
    async fn create(&self, object: &Deployment) -> Result<Deployment, ClientError> {
        let api = self.deployments(object.metadata.namespace.as_deref())?;
        debug!("Creating Deployment {}", object.name_any());
        Ok(api.create(&Self::post_params(), object).await?)
    }
}

#[async_trait::async_trait]
impl ObjectUpdater<Deployment> for KubeClusterClient {
    async fn update(&self, object: &Deployment) -> Result<Deployment, ClientError> {
        let name = required_name(object)?;
        let api = self.deployments(object.metadata.namespace.as_deref())?;
        debug!("Replacing Deployment {}", name);
        Ok(api.replace(&name, &Self::post_params(), object).await?)
    }
}

#[async_trait::async_trait]
impl ObjectGetter<CSISnapshotController> for KubeClusterClient {
    async fn get(
        &self,
        _namespace: Option<&str>,
        name: &str,
    ) -> Result<CSISnapshotController, ClientError> {
        let api: Api<CSISnapshotController> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }
}

#[async_trait::async_trait]
impl StatusUpdater<CSISnapshotController> for KubeClusterClient {
    async fn update_status(
        &self,
        object: &CSISnapshotController,
    ) -> Result<CSISnapshotController, ClientError> {
        let name = required_name(object)?;
        let api: Api<CSISnapshotController> = Api::all(self.client.clone());

        // Merge patch with resourceVersion set: the API server rejects it with
        // 409 if the object changed since it was read.
        let status_patch = serde_json::json!({
            "metadata": {
                "resourceVersion": object.metadata.resource_version,
            },
            "status": object.status,
        });
        let pp = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PatchParams::default()
        };
        debug!("Patching CSISnapshotController {} status", name);
        Ok(api
            .patch_status(&name, &pp, &Patch::Merge(&status_patch))
            .await?)
    }
}
