//! Reconciliation logic.
//!
//! The reconciler is level-triggered: every pass reads the operator config,
//! applies the full desired state (CRDs first, then the operand Deployment)
//! and publishes the resulting conditions. The work key only names the pass;
//! it carries no information about what changed.

use crate::apply::{apply_crd, apply_deployment};
use crate::conditions::{compute_conditions, is_condition_true, merge_conditions};
use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::manifests::ManifestSource;
use chrono::Utc;
use cluster_client::{ObjectClient, ObjectGetter, StatusUpdater};
use crds::{CSISnapshotController, ConditionType, ManagementState};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Component name of the operator in the version store.
pub const OPERATOR_COMPONENT: &str = "operator";

/// Component name of the operand in the version store.
pub const OPERAND_COMPONENT: &str = "operand";

/// Key of the single work item: the managed Deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkKey {
    /// Namespace of the operand Deployment
    pub namespace: String,
    /// Name of the operand Deployment
    pub name: String,
}

impl WorkKey {
    /// Creates a key for `namespace/name`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Component versions known to the operator.
#[derive(Debug, Default)]
pub struct VersionStore {
    versions: RwLock<BTreeMap<String, String>>,
}

impl VersionStore {
    /// Seeds the store with the operator and operand versions of `config`.
    pub fn from_config(config: &OperatorConfig) -> Self {
        let store = Self::default();
        store.set_version(OPERATOR_COMPONENT, &config.operator_version);
        store.set_version(OPERAND_COMPONENT, &config.operand_version);
        store
    }

    /// Records the version of `component`.
    pub fn set_version(&self, component: &str, version: &str) {
        self.versions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(component.to_string(), version.to_string());
    }

    /// Version of `component`, if known.
    pub fn version(&self, component: &str) -> Option<String> {
        self.versions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(component)
            .cloned()
    }

    /// Snapshot of all known versions.
    pub fn versions(&self) -> BTreeMap<String, String> {
        self.versions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Object store capabilities the reconciler needs.
pub trait OperatorClient:
    ObjectClient<CustomResourceDefinition>
    + ObjectClient<Deployment>
    + ObjectGetter<CSISnapshotController>
    + StatusUpdater<CSISnapshotController>
{
}

impl<T> OperatorClient for T where
    T: ObjectClient<CustomResourceDefinition>
        + ObjectClient<Deployment>
        + ObjectGetter<CSISnapshotController>
        + StatusUpdater<CSISnapshotController>
{
}

/// Drives the cluster toward the desired state of the snapshot feature.
pub struct Reconciler<C: ?Sized> {
    client: Arc<C>,
    manifests: Arc<dyn ManifestSource>,
    config: OperatorConfig,
    versions: VersionStore,
    /// Deployment generation observed after the last write of this process
    deployment_generation: RwLock<Option<i64>>,
}

impl<C: ?Sized> fmt::Debug for Reconciler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("versions", &self.versions)
            .field("deployment_generation", &self.deployment_generation)
            .finish_non_exhaustive()
    }
}

impl<C: OperatorClient + ?Sized> Reconciler<C> {
    /// Creates a new reconciler.
    pub fn new(client: Arc<C>, manifests: Arc<dyn ManifestSource>, config: OperatorConfig) -> Self {
        let versions = VersionStore::from_config(&config);
        Self {
            client,
            manifests,
            config,
            versions,
            deployment_generation: RwLock::new(None),
        }
    }

    /// Known component versions.
    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    /// The work key this reconciler is driven by.
    pub fn work_key(&self) -> WorkKey {
        WorkKey::new(
            &self.config.target_namespace,
            self.manifests
                .deployment()
                .metadata
                .name
                .as_deref()
                .unwrap_or(crate::config::OPERAND_DEPLOYMENT_NAME),
        )
    }

    /// Runs one reconciliation pass.
    ///
    /// Returns the first synchronization error, or the status write error if
    /// synchronization succeeded.
    pub async fn sync(&self, key: &WorkKey) -> Result<(), ControllerError> {
        debug!("Syncing {}", key);

        let config_name = self.config.config_name.as_str();
        let fetched =
            ObjectGetter::<CSISnapshotController>::get(self.client.as_ref(), None, config_name).await;
        let original = match fetched {
            Ok(config) => config,
            Err(e) if e.is_not_found() => {
                return Err(ControllerError::ConfigNotFound(config_name.to_string()));
            }
            Err(e) => return Err(ControllerError::Client(e)),
        };

        let state = original.management_state();
        if state != ManagementState::Managed {
            debug!("{} is {:?}, nothing to do", config_name, state);
            return Ok(());
        }

        let sync_result = self.sync_managed_objects().await;
        if let Err(e) = &sync_result {
            warn!("Sync of {} failed: {}", key, e);
        }

        let status_result = self.publish_status(&original, sync_result.as_ref().err()).await;
        if let Err(e) = &status_result {
            if e.is_conflict() {
                info!("Status of {} changed concurrently, will retry: {}", config_name, e);
            } else {
                warn!("Failed to publish status of {}: {}", config_name, e);
            }
        }

        sync_result.and(status_result)
    }

    /// Applies the CRDs, then the Deployment. A CRD failure skips the Deployment.
    async fn sync_managed_objects(&self) -> Result<(), ControllerError> {
        let mut changed = 0;
        for crd in self.manifests.crds() {
            let outcome = apply_crd(self.client.as_ref(), crd)
                .await
                .map_err(ControllerError::SyncCrds)?;
            changed += usize::from(outcome.changed());
        }

        let expected = *self
            .deployment_generation
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let (outcome, generation) =
            apply_deployment(self.client.as_ref(), self.manifests.deployment(), expected)
                .await
                .map_err(ControllerError::SyncDeployments)?;
        *self
            .deployment_generation
            .write()
            .unwrap_or_else(PoisonError::into_inner) = generation;
        changed += usize::from(outcome.changed());

        if changed > 0 {
            info!("Synchronized managed objects, {} written", changed);
        }
        Ok(())
    }

    /// Folds the pass outcome into the status read at the start of the pass
    /// and writes it back if anything changed.
    async fn publish_status(
        &self,
        original: &CSISnapshotController,
        sync_error: Option<&ControllerError>,
    ) -> Result<(), ControllerError> {
        let message = sync_error.map(ToString::to_string);
        let fresh = compute_conditions(message.as_deref());

        let mut status = original.status.clone().unwrap_or_default();
        let was_degraded = is_condition_true(&status.conditions, ConditionType::Degraded);
        status.conditions = merge_conditions(&status.conditions, fresh, Utc::now());
        if was_degraded && !is_condition_true(&status.conditions, ConditionType::Degraded) {
            info!("{} recovered from degraded state", self.config.config_name);
        }

        if sync_error.is_none() {
            status.observed_generation = original.metadata.generation;

            if let Some(version) = self.versions.version(OPERATOR_COMPONENT)
                && !version.is_empty()
                && status.version.as_deref() != Some(version.as_str())
            {
                info!(
                    "Advertising operator version {} (was {})",
                    version,
                    status.version.as_deref().unwrap_or("<none>")
                );
                status.version = Some(version);
            }
        }

        if original.status.as_ref() == Some(&status) {
            debug!("Status of {} is up to date", self.config.config_name);
            return Ok(());
        }

        let mut updated = original.clone();
        updated.status = Some(status);
        self.client
            .update_status(&updated)
            .await
            .map_err(ControllerError::StatusUpdate)?;
        debug!("Updated status of {}", self.config.config_name);
        Ok(())
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;
